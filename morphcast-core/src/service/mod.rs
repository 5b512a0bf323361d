//! Collaborator contracts and the in-process implementations shipped with the relay
//!
//! The chat store and the virtual-session backend live outside the relay core.
//! The core only talks to them through the traits below.

pub mod chat;
pub mod control;

pub use chat::InMemoryChat;
pub use control::ChannelControlSink;

use std::sync::Arc;

use crate::{
    models::{ChatMessage, ControlEvent, PacketEnvelope, SessionId},
    Result,
};

/// Outbound path to one viewer connection
///
/// Implemented by the transport layer. Sending must not block: a viewer that
/// cannot keep up gets an error instead of stalling the caller.
#[cfg_attr(test, mockall::automock)]
pub trait EnvelopeSink: Send + Sync {
    fn send(&self, envelope: PacketEnvelope) -> Result<()>;
}

/// Chat backend contract
pub trait ChatBackend: Send + Sync {
    /// Make a session reachable for chat pushes
    fn register(&self, session_id: SessionId, sink: Arc<dyn EnvelopeSink>);

    /// Forget a session. No-op for unknown sessions.
    fn unregister(&self, session_id: &SessionId);

    /// Push retained history to one registered session
    fn send_history(&self, session_id: &SessionId);

    /// Inbound sink for chat messages tagged with their originating session
    fn submit(&self, message: ChatMessage) -> Result<()>;
}

/// Virtual-session backend contract: fire-and-forget inbound event sink
pub trait VirtualSessionSink: Send + Sync {
    fn submit(&self, event: ControlEvent) -> Result<()>;
}
