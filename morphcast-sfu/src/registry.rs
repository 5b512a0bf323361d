//! Session registry - the set of live viewer sessions
//!
//! Membership changes (connect, disconnect) and broadcast snapshots are
//! mutually exclusive. Per-session work (track writes, peer connection close)
//! always happens outside the membership lock.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use morphcast_core::models::SessionId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::peer::RelayPeer;
use crate::types::{ForwardOutcome, SharedPacket};

/// Registry statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryStats {
    /// Sessions currently registered
    pub active_sessions: usize,
    /// Registered sessions with a bound track
    pub bound_sessions: usize,
    /// Sessions ever connected
    pub total_connected: u64,
    /// Packets accepted by the broadcaster
    pub packets_broadcast: u64,
    /// Per-session packet deliveries queued
    pub packets_relayed: u64,
    /// Per-session packet deliveries dropped on a full queue
    pub packets_dropped: u64,
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub queued: usize,
    pub dropped: usize,
    pub skipped: usize,
}

/// Session registry
pub struct SessionRegistry {
    config: Arc<RelayConfig>,

    sessions: RwLock<HashMap<SessionId, Arc<RelayPeer>>>,

    total_connected: AtomicU64,
    packets_broadcast: AtomicU64,
    packets_relayed: AtomicU64,
    packets_dropped: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        info!(
            stream_binding_id = config.stream_binding_id,
            media_queue_capacity = config.media_queue_capacity,
            "Session registry initialized"
        );
        Arc::new(Self {
            config: Arc::new(config),
            sessions: RwLock::new(HashMap::new()),
            total_connected: AtomicU64::new(0),
            packets_broadcast: AtomicU64::new(0),
            packets_relayed: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register a new session under a freshly generated id
    pub fn connect(&self) -> Arc<RelayPeer> {
        self.connect_with(SessionId::new)
    }

    /// Register a new session, drawing ids from `next_id` until one is unused
    pub fn connect_with(&self, mut next_id: impl FnMut() -> SessionId) -> Arc<RelayPeer> {
        let mut sessions = self.sessions.write();
        loop {
            match sessions.entry(next_id()) {
                Entry::Occupied(entry) => {
                    debug!(session_id = %entry.key(), "Session id collision, regenerating");
                }
                Entry::Vacant(entry) => {
                    let peer = Arc::new(RelayPeer::new(
                        entry.key().clone(),
                        self.config.stream_binding_id,
                        self.config.media_queue_capacity,
                    ));
                    entry.insert(Arc::clone(&peer));
                    self.total_connected.fetch_add(1, Ordering::Relaxed);
                    info!(
                        session_id = %peer.id,
                        active_sessions = sessions.len(),
                        "Session connected"
                    );
                    return peer;
                }
            }
        }
    }

    /// Remove a session and tear down its media state.
    ///
    /// Returns false for unknown or already removed ids. Once this returns the
    /// session receives no further packets.
    pub async fn disconnect(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(session_id);
        let Some(peer) = removed else {
            debug!(session_id = %session_id, "Disconnect for unknown session ignored");
            return false;
        };

        peer.shutdown().await;
        info!(
            session_id = %session_id,
            active_sessions = self.len(),
            "Session disconnected"
        );
        true
    }

    /// Fan one packet out to every bound session in a membership snapshot
    ///
    /// Never waits on a session: a full queue drops the packet for that
    /// session only.
    pub fn broadcast_media(&self, packet: &SharedPacket) -> BroadcastReport {
        let snapshot: Vec<Arc<RelayPeer>> = self.sessions.read().values().cloned().collect();

        let mut report = BroadcastReport::default();
        for peer in &snapshot {
            match peer.try_forward_packet(packet) {
                ForwardOutcome::Queued => report.queued += 1,
                ForwardOutcome::Dropped => report.dropped += 1,
                ForwardOutcome::Skipped => report.skipped += 1,
            }
        }

        self.packets_broadcast.fetch_add(1, Ordering::Relaxed);
        self.packets_relayed
            .fetch_add(report.queued as u64, Ordering::Relaxed);
        if report.dropped > 0 {
            self.packets_dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
            debug!(
                sequence_number = packet.header.sequence_number,
                dropped = report.dropped,
                "Slow sessions dropped a packet"
            );
        }
        report
    }

    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<Arc<RelayPeer>> {
        self.sessions.read().get(session_id).cloned()
    }

    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn get_stats(&self) -> RegistryStats {
        let sessions = self.sessions.read();
        RegistryStats {
            active_sessions: sessions.len(),
            bound_sessions: sessions.values().filter(|p| p.is_bound()).count(),
            total_connected: self.total_connected.load(Ordering::Relaxed),
            packets_broadcast: self.packets_broadcast.load(Ordering::Relaxed),
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }

    /// Disconnect every session (process shutdown)
    pub async fn shutdown(&self) {
        let peers: Vec<Arc<RelayPeer>> = self.sessions.write().drain().map(|(_, p)| p).collect();
        let count = peers.len();
        for peer in peers {
            peer.shutdown().await;
        }
        info!(sessions = count, "Session registry shut down");
    }
}
