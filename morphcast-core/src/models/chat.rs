use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::PacketEnvelope;
use super::id::SessionId;

/// Chat message as received from a viewer, tagged with its originating session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String, // nanoid(16)
    pub session_id: SessionId,
    /// Chat fields exactly as the viewer sent them
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: SessionId, payload: String) -> Self {
        Self {
            id: super::id::generate_id(),
            session_id,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Envelope delivered to viewers when this message is pushed back out
    #[must_use]
    pub fn to_envelope(&self) -> PacketEnvelope {
        PacketEnvelope::chat(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::envelope::Route;

    #[test]
    fn test_chat_message_keeps_payload_verbatim() {
        let msg = ChatMessage::new(SessionId::from("s1"), r#"{"msg":"hi"}"#.to_string());
        assert_eq!(msg.session_id.as_str(), "s1");
        assert_eq!(msg.payload, r#"{"msg":"hi"}"#);

        let envelope = msg.to_envelope();
        assert_eq!(envelope.classify(), Route::Chat);
        assert_eq!(envelope.data, msg.payload);
    }
}
