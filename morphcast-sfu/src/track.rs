//! Local media tracks and the per-session feeder task
//!
//! Each negotiated session owns one local video track. Packets handed to a
//! session are queued, and a dedicated feeder task drains the queue into the
//! track in order. The broadcaster never waits on a track write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use morphcast_core::{models::SessionId, Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use crate::config::RelayConfig;
use crate::types::SharedPacket;

/// Anything a session's packets can be written into
///
/// Returns the number of bytes handed to the transport. Zero means the sink
/// accepted the packet but had nowhere to send it yet.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn write_packet(&self, packet: &Packet) -> Result<usize>;
}

#[async_trait]
impl MediaSink for TrackLocalStaticRTP {
    async fn write_packet(&self, packet: &Packet) -> Result<usize> {
        self.write_rtp(packet)
            .await
            .map_err(|e| Error::Transport(format!("track write failed: {e}")))
    }
}

/// Build the local video track for one session
///
/// The track id is derived from the stream binding so every session relaying
/// the same upstream advertises the same track.
#[must_use]
pub fn local_video_track(config: &RelayConfig) -> Arc<TrackLocalStaticRTP> {
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: config.video_mime_type.clone(),
            clock_rate: config.clock_rate,
            ..Default::default()
        },
        format!("video-{}", config.stream_binding_id),
        config.track_stream_id.clone(),
    ))
}

/// Counters updated by the feeder task
#[derive(Debug, Default)]
pub(crate) struct TrackCounters {
    pub packets_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub packets_unsent: AtomicU64,
    pub write_errors: AtomicU64,
}

/// Snapshot of a session's track delivery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackStats {
    pub packets_written: u64,
    pub bytes_written: u64,
    /// Packets the track accepted while no transport was bound to it
    pub packets_unsent: u64,
    pub write_errors: u64,
}

impl TrackCounters {
    pub(crate) fn snapshot(&self) -> TrackStats {
        TrackStats {
            packets_written: self.packets_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            packets_unsent: self.packets_unsent.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the task that drains a session queue into its track
///
/// The task ends when `closed` fires, the queue sender side is gone, or the
/// track rejects a write. A write that reaches no transport (ICE still
/// connecting) is counted as unsent and the feeder keeps going.
/// Cancellation is checked before every packet, so once the token fires and
/// the task has been awaited nothing more reaches the sink.
pub(crate) fn spawn_feeder(
    session_id: SessionId,
    sink: Arc<dyn MediaSink>,
    mut packets: mpsc::Receiver<SharedPacket>,
    closed: CancellationToken,
    counters: Arc<TrackCounters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let packet = tokio::select! {
                biased;
                () = closed.cancelled() => break,
                packet = packets.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            match sink.write_packet(&packet).await {
                Ok(0) => {
                    counters.packets_unsent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(n) => {
                    counters.packets_written.fetch_add(1, Ordering::Relaxed);
                    counters.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.write_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        "Track write failed, stopping feeder"
                    );
                    break;
                }
            }
        }
        debug!(session_id = %session_id, "Feeder stopped");
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use webrtc::rtp::header::Header;
    use webrtc::util::marshal::MarshalSize;

    /// Records every packet written, optionally holding each write until released
    #[derive(Default)]
    pub struct RecordingSink {
        pub written: Mutex<Vec<u16>>,
        pub gate: Option<tokio::sync::Semaphore>,
    }

    impl RecordingSink {
        pub fn gated() -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                gate: Some(tokio::sync::Semaphore::new(0)),
            }
        }

        pub fn release(&self, permits: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(permits);
            }
        }

        pub fn sequence_numbers(&self) -> Vec<u16> {
            self.written.lock().clone()
        }
    }

    #[async_trait]
    impl MediaSink for RecordingSink {
        async fn write_packet(&self, packet: &Packet) -> Result<usize> {
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?
                    .forget();
            }
            self.written.lock().push(packet.header.sequence_number);
            Ok(packet.marshal_size())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl MediaSink for FailingSink {
        async fn write_packet(&self, _packet: &Packet) -> Result<usize> {
            Err(Error::Transport("closed pipe".to_string()))
        }
    }

    /// Accepts every packet without a transport to send it on
    struct UnboundSink;

    #[async_trait]
    impl MediaSink for UnboundSink {
        async fn write_packet(&self, _packet: &Packet) -> Result<usize> {
            Ok(0)
        }
    }

    pub fn packet(ssrc: u32, sequence_number: u16) -> SharedPacket {
        Arc::new(Packet {
            header: Header {
                version: 2,
                payload_type: 96,
                sequence_number,
                timestamp: u32::from(sequence_number) * 3000,
                ssrc,
                ..Default::default()
            },
            payload: bytes::Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
        })
    }

    #[test]
    fn test_local_track_identity() {
        let config = RelayConfig {
            stream_binding_id: 42,
            ..RelayConfig::default()
        };
        let track = local_video_track(&config);
        assert_eq!(webrtc::track::track_local::TrackLocal::id(track.as_ref()), "video-42");
        assert_eq!(
            webrtc::track::track_local::TrackLocal::stream_id(track.as_ref()),
            "morphcast"
        );
    }

    #[tokio::test]
    async fn test_feeder_writes_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let closed = CancellationToken::new();
        let counters = Arc::new(TrackCounters::default());
        let handle = spawn_feeder(
            SessionId::from("s1"),
            sink.clone(),
            rx,
            closed.clone(),
            counters.clone(),
        );

        for seq in 1..=5 {
            tx.send(packet(7, seq)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(sink.sequence_numbers(), vec![1, 2, 3, 4, 5]);
        let stats = counters.snapshot();
        assert_eq!(stats.packets_written, 5);
        assert_eq!(stats.bytes_written, 5 * packet(7, 1).marshal_size() as u64);
        assert_eq!(stats.packets_unsent, 0);
    }

    #[tokio::test]
    async fn test_feeder_counts_unsent_writes() {
        let (tx, rx) = mpsc::channel(8);
        let counters = Arc::new(TrackCounters::default());
        let handle = spawn_feeder(
            SessionId::from("s1"),
            Arc::new(UnboundSink),
            rx,
            CancellationToken::new(),
            counters.clone(),
        );

        for seq in 1..=3 {
            tx.send(packet(7, seq)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let stats = counters.snapshot();
        assert_eq!(stats.packets_unsent, 3);
        assert_eq!(stats.packets_written, 0);
        assert_eq!(stats.bytes_written, 0);
        assert_eq!(stats.write_errors, 0);
    }

    #[tokio::test]
    async fn test_feeder_stops_on_cancel() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(8);
        let closed = CancellationToken::new();
        let handle = spawn_feeder(
            SessionId::from("s1"),
            sink.clone(),
            rx,
            closed.clone(),
            Arc::new(TrackCounters::default()),
        );

        closed.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        // Nothing is drained after the token fired
        tx.try_send(packet(7, 1)).ok();
        tokio::task::yield_now().await;
        assert!(sink.sequence_numbers().is_empty());
    }

    #[tokio::test]
    async fn test_feeder_stops_on_write_error() {
        let (tx, rx) = mpsc::channel(8);
        let counters = Arc::new(TrackCounters::default());
        let handle = spawn_feeder(
            SessionId::from("s1"),
            Arc::new(FailingSink),
            rx,
            CancellationToken::new(),
            counters.clone(),
        );

        tx.send(packet(7, 1)).await.unwrap();
        handle.await.unwrap();

        assert_eq!(counters.snapshot().write_errors, 1);
        assert!(tx.is_closed());
    }
}
