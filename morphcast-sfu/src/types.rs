//! Common types used throughout the relay implementation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One upstream RTP packet, shared between every session it is fanned out to
pub type SharedPacket = Arc<webrtc::rtp::packet::Packet>;

/// Per-session progress through the offer/answer handshake
///
/// Moves strictly forward: `None -> OfferReceived -> TrackBound -> AnswerSent`.
/// A media connection walks this sequence at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    #[default]
    None,
    OfferReceived,
    TrackBound,
    AnswerSent,
}

impl NegotiationState {
    /// The only state that may directly follow this one
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::None => Some(Self::OfferReceived),
            Self::OfferReceived => Some(Self::TrackBound),
            Self::TrackBound => Some(Self::AnswerSent),
            Self::AnswerSent => None,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::OfferReceived => "OfferReceived",
            Self::TrackBound => "TrackBound",
            Self::AnswerSent => "AnswerSent",
        };
        f.write_str(name)
    }
}

/// Result of offering one packet to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Packet queued for the session's track
    Queued,
    /// Session queue full or its feeder gone; packet dropped for this session only
    Dropped,
    /// Session not eligible (no bound track, closed, or a different stream)
    Skipped,
}
