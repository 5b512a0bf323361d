//! Per-connection event multiplexer
//!
//! Every viewer connection carries three protocols over one envelope stream:
//! media signaling, chat and virtual-session control. `SessionHandler` owns the
//! receive loop for one connection and routes each inbound envelope to exactly
//! one consumer. The transport only supplies IO through `StreamMessage`.

use std::sync::Arc;

use morphcast_core::{
    models::{ChatMessage, ControlEvent, EnvelopeKind, PacketEnvelope, Route, SessionId},
    service::{ChatBackend, EnvelopeSink, VirtualSessionSink},
    Error, Result,
};
use morphcast_sfu::{Negotiator, RelayPeer, SessionRegistry};
use tracing::{debug, info, warn};

/// Bidirectional IO for one viewer connection
///
/// Implemented by the WebSocket transport and by in-memory transports in tests.
#[async_trait::async_trait]
pub trait StreamMessage: Send + Sync {
    /// Next inbound envelope.
    ///
    /// `None` when the connection closed. `Err(MalformedEnvelope)` for a frame
    /// that did not decode; any other error ends the session.
    async fn recv(&mut self) -> Option<Result<PacketEnvelope>>;

    /// Outbound path shared with backends that push to this viewer
    fn sender(&self) -> Arc<dyn EnvelopeSink>;
}

/// Where a session's receive loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Listening,
    /// Negotiation in flight; inbound frames wait until it completes
    SignalingInProgress,
    Closed,
}

/// What happened over a session's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub envelopes: u64,
    pub malformed: u64,
}

/// Shared handler that runs the receive loop of each viewer connection
#[derive(Clone)]
pub struct SessionHandler {
    registry: Arc<SessionRegistry>,
    negotiator: Arc<Negotiator>,
    chat: Arc<dyn ChatBackend>,
    control: Arc<dyn VirtualSessionSink>,
}

impl SessionHandler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        negotiator: Arc<Negotiator>,
        chat: Arc<dyn ChatBackend>,
        control: Arc<dyn VirtualSessionSink>,
    ) -> Self {
        Self {
            registry,
            negotiator,
            chat,
            control,
        }
    }

    /// Run one connection from accept to teardown
    ///
    /// Registers the session, replays chat history, then dispatches inbound
    /// envelopes until the transport closes or fails. Teardown always removes
    /// the session from the registry and the chat backend.
    pub async fn run<S: StreamMessage>(&self, stream: &mut S) -> SessionReport {
        let peer = self.registry.connect();
        let sender = stream.sender();
        self.chat.register(peer.id.clone(), Arc::clone(&sender));
        self.chat.send_history(&peer.id);

        let mut report = SessionReport {
            session_id: peer.id.clone(),
            phase: SessionPhase::Listening,
            envelopes: 0,
            malformed: 0,
        };

        while let Some(received) = stream.recv().await {
            let envelope = match received {
                Ok(envelope) => envelope,
                Err(Error::MalformedEnvelope(reason)) => {
                    report.malformed += 1;
                    warn!(session_id = %peer.id, reason = %reason, "Ignoring malformed envelope");
                    continue;
                }
                Err(e) => {
                    info!(session_id = %peer.id, error = %e, "Connection read failed");
                    break;
                }
            };

            report.envelopes += 1;
            if let Err(e) = self.dispatch(&peer, &sender, envelope, &mut report).await {
                if e.is_fatal_to_session() {
                    info!(session_id = %peer.id, error = %e, "Ending session");
                    break;
                }
                warn!(session_id = %peer.id, error = %e, "Envelope handling failed");
            }
        }

        report.phase = SessionPhase::Closed;
        self.chat.unregister(&peer.id);
        self.registry.disconnect(&peer.id).await;
        info!(
            session_id = %peer.id,
            envelopes = report.envelopes,
            malformed = report.malformed,
            "Session closed"
        );
        report
    }

    async fn dispatch(
        &self,
        peer: &RelayPeer,
        sender: &Arc<dyn EnvelopeSink>,
        envelope: PacketEnvelope,
        report: &mut SessionReport,
    ) -> Result<()> {
        match envelope.classify() {
            Route::Signaling => match envelope.kind() {
                EnvelopeKind::Offer => {
                    report.phase = SessionPhase::SignalingInProgress;
                    let outcome = self.negotiator.negotiate(peer, &envelope).await;
                    report.phase = SessionPhase::Listening;

                    let answer = outcome?;
                    sender.send(answer)
                }
                _ => {
                    debug!(
                        session_id = %peer.id,
                        tag = %envelope.tag,
                        "Dropping server-bound signaling envelope"
                    );
                    Ok(())
                }
            },
            Route::Chat => self
                .chat
                .submit(ChatMessage::new(peer.id.clone(), envelope.data)),
            Route::Control => self
                .control
                .submit(ControlEvent::from_envelope(peer.id.clone(), envelope)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphcast_core::service::{ChannelControlSink, InMemoryChat};
    use morphcast_sfu::RelayConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<PacketEnvelope>>);

    impl EnvelopeSink for Outbox {
        fn send(&self, envelope: PacketEnvelope) -> Result<()> {
            self.0.lock().push(envelope);
            Ok(())
        }
    }

    struct Scripted {
        inbound: VecDeque<Result<PacketEnvelope>>,
        outbox: Arc<Outbox>,
    }

    #[async_trait::async_trait]
    impl StreamMessage for Scripted {
        async fn recv(&mut self) -> Option<Result<PacketEnvelope>> {
            self.inbound.pop_front()
        }

        fn sender(&self) -> Arc<dyn EnvelopeSink> {
            self.outbox.clone()
        }
    }

    fn handler() -> (
        SessionHandler,
        Arc<SessionRegistry>,
        tokio::sync::mpsc::Receiver<ControlEvent>,
    ) {
        let config = RelayConfig {
            stun_servers: Vec::new(),
            ..RelayConfig::default()
        };
        let registry = SessionRegistry::new(config.clone());
        let negotiator = Arc::new(Negotiator::new(config).unwrap());
        let (control, control_rx) = ChannelControlSink::new(16);
        let handler = SessionHandler::new(
            Arc::clone(&registry),
            negotiator,
            Arc::new(InMemoryChat::new(10)),
            Arc::new(control),
        );
        (handler, registry, control_rx)
    }

    #[tokio::test]
    async fn test_routes_each_envelope_once() {
        let (handler, registry, mut control_rx) = handler();
        let outbox = Arc::new(Outbox::default());
        let mut stream = Scripted {
            inbound: VecDeque::from(vec![
                Ok(PacketEnvelope::new("MOUSEMOVE", "{\"x\":3}")),
                Ok(PacketEnvelope::answer("ignored")),
                Ok(PacketEnvelope::chat("{\"msg\":\"hi\"}")),
            ]),
            outbox: outbox.clone(),
        };

        let report = handler.run(&mut stream).await;
        assert_eq!(report.envelopes, 3);
        assert_eq!(report.phase, SessionPhase::Closed);
        assert!(registry.is_empty());

        let event = control_rx.try_recv().unwrap();
        assert_eq!(event.session_id, report.session_id);
        assert_eq!(event.tag, "MOUSEMOVE");
        assert!(control_rx.try_recv().is_err());

        // The chat echo is the only thing sent back
        let sent = outbox.0.lock().clone();
        assert_eq!(sent, vec![PacketEnvelope::chat("{\"msg\":\"hi\"}")]);
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_end_session() {
        let (handler, _registry, mut control_rx) = handler();
        let mut stream = Scripted {
            inbound: VecDeque::from(vec![
                Err(Error::MalformedEnvelope("not json".to_string())),
                Ok(PacketEnvelope::new("KEYDOWN", "13")),
            ]),
            outbox: Arc::new(Outbox::default()),
        };

        let report = handler.run(&mut stream).await;
        assert_eq!(report.malformed, 1);
        assert_eq!(report.envelopes, 1);
        assert_eq!(control_rx.try_recv().unwrap().tag, "KEYDOWN");
    }

    #[tokio::test]
    async fn test_read_error_ends_session() {
        let (handler, registry, mut control_rx) = handler();
        let mut stream = Scripted {
            inbound: VecDeque::from(vec![
                Err(Error::Transport("reset by peer".to_string())),
                Ok(PacketEnvelope::new("KEYDOWN", "13")),
            ]),
            outbox: Arc::new(Outbox::default()),
        };

        let report = handler.run(&mut stream).await;
        assert_eq!(report.envelopes, 0);
        assert!(registry.is_empty());
        assert!(control_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_offer_keeps_session_alive() {
        let (handler, _registry, mut control_rx) = handler();
        let outbox = Arc::new(Outbox::default());
        let mut stream = Scripted {
            inbound: VecDeque::from(vec![
                Ok(PacketEnvelope::offer("not base64 at all")),
                Ok(PacketEnvelope::new("KEYUP", "13")),
            ]),
            outbox: outbox.clone(),
        };

        let report = handler.run(&mut stream).await;
        assert_eq!(report.envelopes, 2);
        assert!(outbox.0.lock().is_empty());
        assert_eq!(control_rx.try_recv().unwrap().tag, "KEYUP");
    }
}
