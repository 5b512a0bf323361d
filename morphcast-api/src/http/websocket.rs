//! WebSocket transport for viewer connections
//!
//! Envelopes travel as JSON text frames (binary frames holding the same JSON
//! are accepted). All routing happens in `SessionHandler`; this module only
//! adapts the socket to `StreamMessage`.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{stream::SplitStream, SinkExt, StreamExt};
use morphcast_core::{models::PacketEnvelope, service::EnvelopeSink, Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::http::AppState;
use crate::impls::StreamMessage;

/// WebSocket implementation of `StreamMessage`
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
    sender: Arc<WebSocketMessageSender>,
}

#[async_trait::async_trait]
impl StreamMessage for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<PacketEnvelope>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(PacketEnvelope::from_json(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => return Some(PacketEnvelope::from_slice(&bytes)),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    return Some(Err(Error::Transport(format!("WebSocket error: {e}"))));
                }
                Some(Ok(_)) => {
                    // Ping/pong are handled by the socket itself
                }
            }
        }
    }

    fn sender(&self) -> Arc<dyn EnvelopeSink> {
        self.sender.clone()
    }
}

/// Outbound half: envelopes go through a bounded queue drained by one writer task
pub struct WebSocketMessageSender {
    sender: mpsc::Sender<Message>,
}

impl WebSocketMessageSender {
    #[must_use]
    pub const fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }
}

impl EnvelopeSink for WebSocketMessageSender {
    fn send(&self, envelope: PacketEnvelope) -> Result<()> {
        let json = envelope.to_json()?;

        // A viewer that cannot keep up loses messages instead of stalling the caller
        self.sender
            .try_send(Message::Text(json.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    Error::Transport("outbound queue full: viewer too slow".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    Error::SessionClosed("viewer connection gone".to_string())
                }
            })
    }
}

/// Viewer connection endpoint
///
/// Any origin may connect.
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.server.outbound_buffer);
    let (mut ws_sink, ws_receiver) = socket.split();

    // Single writer per connection
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sink.send(message).await {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut stream = WebSocketStream {
        receiver: ws_receiver,
        sender: Arc::new(WebSocketMessageSender::new(tx)),
    };

    let report = state.handler.run(&mut stream).await;
    drop(stream);

    // Backends dropped their senders on unregister; the writer drains what is left and exits
    if let Err(e) = writer.await {
        debug!(error = %e, "WebSocket writer task ended abnormally");
    }
    info!(
        session_id = %report.session_id,
        envelopes = report.envelopes,
        "WebSocket connection closed"
    );
}
