//! Wire envelope shared by every protocol carried over a viewer connection
//!
//! Every message is a JSON object `{"type": <tag>, "data": <string>}`. The tag
//! selects the consumer; the payload is opaque to the transport.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

pub const TAG_OFFER: &str = "OFFER";
pub const TAG_ANSWER: &str = "ANSWER";
pub const TAG_CHAT: &str = "CHAT";

/// Closed set of recognized envelope kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Viewer's session description offer
    Offer,
    /// Server's session description answer (server to viewer only)
    Answer,
    /// Chat message
    Chat,
    /// Anything else, forwarded to the virtual-session backend as-is
    Control(String),
}

impl EnvelopeKind {
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            TAG_OFFER => Self::Offer,
            TAG_ANSWER => Self::Answer,
            TAG_CHAT => Self::Chat,
            other => Self::Control(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Offer => TAG_OFFER,
            Self::Answer => TAG_ANSWER,
            Self::Chat => TAG_CHAT,
            Self::Control(tag) => tag,
        }
    }

    /// Which consumer an inbound envelope of this kind belongs to
    #[must_use]
    pub const fn route(&self) -> Route {
        match self {
            Self::Offer | Self::Answer => Route::Signaling,
            Self::Chat => Route::Chat,
            Self::Control(_) => Route::Control,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Destination of an inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Signaling,
    Chat,
    Control,
}

/// Generic wire message: type tag + string payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketEnvelope {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub data: String,
}

impl PacketEnvelope {
    pub fn new(tag: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            data: data.into(),
        }
    }

    pub fn offer(data: impl Into<String>) -> Self {
        Self::new(TAG_OFFER, data)
    }

    pub fn answer(data: impl Into<String>) -> Self {
        Self::new(TAG_ANSWER, data)
    }

    pub fn chat(data: impl Into<String>) -> Self {
        Self::new(TAG_CHAT, data)
    }

    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        EnvelopeKind::from_tag(&self.tag)
    }

    /// Classify this envelope into signaling, chat or control
    #[must_use]
    pub fn classify(&self) -> Route {
        self.kind().route()
    }

    /// Decode an envelope from a text frame
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }

    /// Decode an envelope from a binary frame
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_recognized_tags() {
        assert_eq!(PacketEnvelope::offer("x").classify(), Route::Signaling);
        assert_eq!(PacketEnvelope::answer("x").classify(), Route::Signaling);
        assert_eq!(PacketEnvelope::chat("x").classify(), Route::Chat);
    }

    #[test]
    fn test_unknown_tags_route_to_control() {
        let envelope = PacketEnvelope::new("MOUSEDOWN", "{\"x\":1,\"y\":2}");
        assert_eq!(envelope.classify(), Route::Control);
        assert_eq!(envelope.kind(), EnvelopeKind::Control("MOUSEDOWN".to_string()));
        assert_eq!(envelope.kind().as_tag(), "MOUSEDOWN");
    }

    #[test]
    fn test_tags_are_case_sensitive() {
        assert_eq!(PacketEnvelope::new("offer", "").classify(), Route::Control);
    }

    #[test]
    fn test_wire_format() {
        let envelope = PacketEnvelope::chat("{\"msg\":\"hi\"}");
        let json = envelope.to_json().unwrap();
        assert_eq!(json, r#"{"type":"CHAT","data":"{\"msg\":\"hi\"}"}"#);
        assert_eq!(PacketEnvelope::from_json(&json).unwrap(), envelope);
    }

    #[test]
    fn test_missing_data_defaults_to_empty() {
        let envelope = PacketEnvelope::from_json(r#"{"type":"KEYUP"}"#).unwrap();
        assert_eq!(envelope.tag, "KEYUP");
        assert!(envelope.data.is_empty());
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let err = PacketEnvelope::from_json("not json").unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));

        let err = PacketEnvelope::from_slice(br#"{"data":"no tag"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }
}
