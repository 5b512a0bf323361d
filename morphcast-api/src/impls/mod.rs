//! Transport-independent connection handling

pub mod messaging;

pub use messaging::{SessionHandler, SessionPhase, SessionReport, StreamMessage};
