//! Relay peer: one viewer's media-side state
//!
//! Holds the negotiation state, the bounded packet queue between the
//! broadcaster and the session's track, the peer connection handle and the
//! teardown signal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use morphcast_core::{models::SessionId, Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;

use crate::track::{spawn_feeder, MediaSink, TrackCounters, TrackStats};
use crate::types::{ForwardOutcome, NegotiationState, SharedPacket};

/// Relay peer - the media half of a connected viewer session
pub struct RelayPeer {
    /// Session ID
    pub id: SessionId,

    /// Upstream stream this session relays
    stream_binding_id: u32,

    negotiation: Mutex<NegotiationState>,

    /// Sender side of the bounded packet queue.
    /// The broadcaster writes here; the feeder task drains into the track.
    packet_tx: mpsc::Sender<SharedPacket>,

    /// Receiver side, taken once when a track is bound.
    packet_rx: Mutex<Option<mpsc::Receiver<SharedPacket>>>,

    /// Set once the local track is bound and fed
    track_bound: AtomicBool,

    connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    feeder: Mutex<Option<JoinHandle<()>>>,

    /// Fired on teardown
    closed: CancellationToken,

    packets_queued: AtomicU64,
    packets_dropped: AtomicU64,
    track_counters: Arc<TrackCounters>,
}

impl RelayPeer {
    #[must_use]
    pub fn new(id: SessionId, stream_binding_id: u32, queue_capacity: usize) -> Self {
        let (packet_tx, packet_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            id,
            stream_binding_id,
            negotiation: Mutex::new(NegotiationState::None),
            packet_tx,
            packet_rx: Mutex::new(Some(packet_rx)),
            track_bound: AtomicBool::new(false),
            connection: Mutex::new(None),
            feeder: Mutex::new(None),
            closed: CancellationToken::new(),
            packets_queued: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            track_counters: Arc::new(TrackCounters::default()),
        }
    }

    #[must_use]
    pub const fn stream_binding_id(&self) -> u32 {
        self.stream_binding_id
    }

    #[must_use]
    pub fn negotiation_state(&self) -> NegotiationState {
        *self.negotiation.lock()
    }

    /// Advance the handshake by exactly one step
    ///
    /// Fails with `DuplicateOffer` when the state is not `from`, which is how a
    /// second offer on an already negotiating session is rejected.
    pub fn advance(&self, from: NegotiationState, to: NegotiationState) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed(self.id.to_string()));
        }
        let mut state = self.negotiation.lock();
        if *state != from || from.next() != Some(to) {
            return Err(Error::DuplicateOffer {
                state: state.to_string(),
            });
        }
        *state = to;
        debug!(session_id = %self.id, from = %from, to = %to, "Negotiation advanced");
        Ok(())
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.track_bound.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token fired when this peer is torn down
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Keep the peer connection so teardown can close it
    pub fn attach_connection(&self, connection: Arc<RTCPeerConnection>) {
        *self.connection.lock() = Some(connection);
    }

    #[must_use]
    pub fn connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.connection.lock().clone()
    }

    /// Take the connection back out, leaving the peer without one
    pub fn detach_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.connection.lock().take()
    }

    /// Bind the local track and start feeding it.
    /// Can only succeed once per peer.
    pub fn bind_track(&self, sink: Arc<dyn MediaSink>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed(self.id.to_string()));
        }
        let Some(packets) = self.packet_rx.lock().take() else {
            return Err(Error::Internal(format!(
                "session {} already has a bound track",
                self.id
            )));
        };

        let handle = spawn_feeder(
            self.id.clone(),
            sink,
            packets,
            self.closed.clone(),
            Arc::clone(&self.track_counters),
        );
        *self.feeder.lock() = Some(handle);
        self.track_bound.store(true, Ordering::Release);
        Ok(())
    }

    /// Offer one packet to this session without waiting.
    ///
    /// Only bound, open sessions relaying the packet's stream are eligible.
    /// A full queue drops the packet for this session alone.
    pub fn try_forward_packet(&self, packet: &SharedPacket) -> ForwardOutcome {
        if self.is_closed() || !self.is_bound() || packet.header.ssrc != self.stream_binding_id {
            return ForwardOutcome::Skipped;
        }

        match self.packet_tx.try_send(Arc::clone(packet)) {
            Ok(()) => {
                self.packets_queued.fetch_add(1, Ordering::Relaxed);
                ForwardOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) => {
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                ForwardOutcome::Dropped
            }
        }
    }

    /// Tear down media state. Idempotent.
    ///
    /// Fires the teardown signal, waits for the feeder to stop and closes the
    /// peer connection. When this returns no further packet reaches the track.
    pub async fn shutdown(&self) {
        self.closed.cancel();

        // Never bound: drop the queue so nothing accumulates
        self.packet_rx.lock().take();

        let feeder = self.feeder.lock().take();
        if let Some(feeder) = feeder {
            if let Err(e) = feeder.await {
                warn!(session_id = %self.id, error = %e, "Feeder task ended abnormally");
            }
        }

        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!(session_id = %self.id, error = %e, "Failed to close peer connection");
            }
        }
    }

    #[must_use]
    pub fn get_stats(&self) -> PeerStats {
        PeerStats {
            negotiation: self.negotiation_state(),
            bound: self.is_bound(),
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            track: self.track_counters.snapshot(),
        }
    }
}

impl Drop for RelayPeer {
    fn drop(&mut self) {
        // Feeder must not outlive its session even without an explicit shutdown
        self.closed.cancel();
        debug!(session_id = %self.id, "RelayPeer dropped");
    }
}

/// Peer statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStats {
    pub negotiation: NegotiationState,
    pub bound: bool,
    /// Packets accepted into the session queue
    pub packets_queued: u64,
    /// Packets dropped because the queue was full
    pub packets_dropped: u64,
    pub track: TrackStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::tests::{packet, RecordingSink};
    use std::time::Duration;

    const SSRC: u32 = 1234;

    fn peer(capacity: usize) -> RelayPeer {
        RelayPeer::new(SessionId::from("peer-1"), SSRC, capacity)
    }

    async fn wait_for(sink: &RecordingSink, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.sequence_numbers().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_peer_creation() {
        let peer = peer(4);
        assert_eq!(peer.negotiation_state(), NegotiationState::None);
        assert!(!peer.is_bound());
        assert!(!peer.is_closed());
        assert_eq!(peer.stream_binding_id(), SSRC);
    }

    #[test]
    fn test_advance_rejects_out_of_order_steps() {
        let peer = peer(4);
        peer.advance(NegotiationState::None, NegotiationState::OfferReceived)
            .unwrap();

        let err = peer
            .advance(NegotiationState::None, NegotiationState::OfferReceived)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOffer { .. }));

        let err = peer
            .advance(NegotiationState::OfferReceived, NegotiationState::AnswerSent)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOffer { .. }));
        assert_eq!(peer.negotiation_state(), NegotiationState::OfferReceived);
    }

    #[test]
    fn test_unbound_peer_skips_packets() {
        let peer = peer(4);
        assert_eq!(peer.try_forward_packet(&packet(SSRC, 1)), ForwardOutcome::Skipped);
        assert_eq!(peer.get_stats().packets_queued, 0);
    }

    #[tokio::test]
    async fn test_other_stream_is_skipped() {
        let peer = peer(4);
        peer.bind_track(Arc::new(RecordingSink::default())).unwrap();
        assert_eq!(peer.try_forward_packet(&packet(SSRC + 1, 1)), ForwardOutcome::Skipped);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_only_once() {
        let peer = peer(4);
        peer.bind_track(Arc::new(RecordingSink::default())).unwrap();
        assert!(peer.bind_track(Arc::new(RecordingSink::default())).is_err());
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_and_keeps_order() {
        let sink = Arc::new(RecordingSink::gated());
        let peer = peer(2);
        peer.bind_track(sink.clone()).unwrap();

        // Feeder takes #1 and blocks on the gate; #2 and #3 fill the queue.
        assert_eq!(peer.try_forward_packet(&packet(SSRC, 1)), ForwardOutcome::Queued);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(peer.try_forward_packet(&packet(SSRC, 2)), ForwardOutcome::Queued);
        assert_eq!(peer.try_forward_packet(&packet(SSRC, 3)), ForwardOutcome::Queued);
        assert_eq!(peer.try_forward_packet(&packet(SSRC, 4)), ForwardOutcome::Dropped);

        sink.release(3);
        wait_for(&sink, 3).await;
        assert_eq!(sink.sequence_numbers(), vec![1, 2, 3]);

        let stats = peer.get_stats();
        assert_eq!(stats.packets_queued, 3);
        assert_eq!(stats.packets_dropped, 1);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_nothing_delivered_after_shutdown() {
        let sink = Arc::new(RecordingSink::default());
        let peer = peer(8);
        peer.bind_track(sink.clone()).unwrap();

        peer.try_forward_packet(&packet(SSRC, 1));
        wait_for(&sink, 1).await;

        peer.shutdown().await;
        assert_eq!(peer.try_forward_packet(&packet(SSRC, 2)), ForwardOutcome::Skipped);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.sequence_numbers(), vec![1]);

        // Second shutdown is a no-op
        peer.shutdown().await;
        assert!(peer.is_closed());
    }
}
