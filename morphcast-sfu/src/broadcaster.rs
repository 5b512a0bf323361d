//! Media broadcaster: upstream packets in, per-session queues out

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;
use crate::upstream::UpstreamSource;

/// Totals for one broadcaster run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub packets: u64,
    pub deliveries: u64,
    pub drops: u64,
}

/// Pumps one upstream source into the registry until it is exhausted
pub struct MediaBroadcaster {
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl MediaBroadcaster {
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }

    pub fn spawn<S>(self, source: S) -> JoinHandle<BroadcastSummary>
    where
        S: UpstreamSource + 'static,
    {
        tokio::spawn(self.run(source))
    }

    /// Runs until the source is exhausted or shutdown is requested.
    ///
    /// Exhaustion is terminal: the broadcaster stops, sessions stay connected
    /// and simply receive no more media.
    pub async fn run<S: UpstreamSource>(self, mut source: S) -> BroadcastSummary {
        let expected = self.registry.config().stream_binding_id;
        if source.stream_binding_id() != expected {
            warn!(
                source_ssrc = source.stream_binding_id(),
                session_ssrc = expected,
                "Upstream stream does not match session binding, nothing will be relayed"
            );
        }

        let mut summary = BroadcastSummary::default();
        loop {
            let packet = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!(packets = summary.packets, "Broadcaster stopped by shutdown");
                    return summary;
                }
                packet = source.recv() => packet,
            };

            let Some(packet) = packet else {
                info!(
                    packets = summary.packets,
                    drops = summary.drops,
                    "Upstream media source exhausted, broadcaster stopped"
                );
                return summary;
            };

            let report = self.registry.broadcast_media(&Arc::new(packet));
            summary.packets += 1;
            summary.deliveries += report.queued as u64;
            summary.drops += report.dropped as u64;
        }
    }
}
