//! Server lifecycle
//!
//! Wires the relay together and manages startup and shutdown of:
//! - upstream RTP listener and media broadcaster
//! - HTTP server (viewer WebSocket endpoint and health probe)

use std::sync::Arc;

use anyhow::Result;
use morphcast_api::{create_router, AppState, SessionHandler};
use morphcast_core::{
    models::ControlEvent,
    service::{ChannelControlSink, InMemoryChat},
    Config,
};
use morphcast_sfu::{MediaBroadcaster, Negotiator, RelayConfig, SessionRegistry, UdpRtpSource};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Morphcast server - owns every long-running component
pub struct MorphcastServer {
    config: Arc<Config>,
    shutdown: CancellationToken,
}

impl MorphcastServer {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start all components and wait for a shutdown signal
    pub async fn run(self) -> Result<()> {
        let relay_config = RelayConfig::from_webrtc(&self.config.webrtc, self.config.upstream.ssrc);
        let registry = SessionRegistry::new(relay_config.clone());
        let negotiator = Arc::new(Negotiator::new(relay_config)?);

        // Collaborator backends
        let chat = Arc::new(InMemoryChat::new(self.config.chat.history_limit));
        let (control, control_rx) = ChannelControlSink::new(self.config.control.queue_capacity);
        let control_task = spawn_control_logger(control_rx);

        // Upstream media
        let source = UdpRtpSource::bind(
            &self.config.upstream.rtp_listen_addr,
            self.config.upstream.ssrc,
            self.config.upstream.mtu,
        )
        .await?;
        let broadcaster =
            MediaBroadcaster::new(Arc::clone(&registry), self.shutdown.clone()).spawn(source);

        // HTTP
        let state = AppState {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&registry),
            handler: SessionHandler::new(
                Arc::clone(&registry),
                negotiator,
                chat,
                Arc::new(control),
            ),
        };
        let mut http_handle = self.start_http_server(state).await?;

        info!("All components started successfully");

        tokio::select! {
            result = &mut http_handle => {
                error!(result = ?result, "HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        self.shutdown.cancel();

        match broadcaster.await {
            Ok(summary) => {
                info!(packets = summary.packets, drops = summary.drops, "Broadcaster finished");
            }
            Err(e) => warn!(error = %e, "Broadcaster task failed"),
        }
        if !http_handle.is_finished() {
            if let Err(e) = http_handle.await {
                warn!(error = %e, "HTTP server task failed");
            }
        }
        registry.shutdown().await;
        control_task.abort();

        info!("Morphcast relay stopped");
        Ok(())
    }

    async fn start_http_server(&self, state: AppState) -> Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let listener = TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener on {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let router = create_router(state);
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("HTTP server error: {}", e);
            }
        }))
    }
}

/// Stand-in virtual-session backend: logs every control event it receives
fn spawn_control_logger(mut events: mpsc::Receiver<ControlEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(
                session_id = %event.session_id,
                tag = %event.tag,
                data = %event.data,
                "Control event"
            );
        }
    })
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
