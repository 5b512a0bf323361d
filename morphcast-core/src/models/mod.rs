pub mod chat;
pub mod control;
pub mod envelope;
pub mod id;

pub use chat::ChatMessage;
pub use control::ControlEvent;
pub use envelope::{EnvelopeKind, PacketEnvelope, Route, TAG_ANSWER, TAG_CHAT, TAG_OFFER};
pub use id::{generate_id, SessionId};
