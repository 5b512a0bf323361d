use serde::{Deserialize, Serialize};

use super::envelope::PacketEnvelope;
use super::id::SessionId;

/// Interactive input event bound for the virtual-session backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub tag: String,
    pub data: String,
}

impl ControlEvent {
    #[must_use]
    pub fn from_envelope(session_id: SessionId, envelope: PacketEnvelope) -> Self {
        Self {
            session_id,
            tag: envelope.tag,
            data: envelope.data,
        }
    }
}
