use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Read or write failure on a viewer connection. Fatal to that session only.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound envelope or payload could not be decoded.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A handshake step failed; the session keeps running without media.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Duplicate offer: session already negotiated ({state})")]
    DuplicateOffer { state: String },

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Upstream media source exhausted")]
    UpstreamExhausted,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error ends the session that produced it.
    #[must_use]
    pub const fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SessionClosed(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::Transport("reset".to_string()).is_fatal_to_session());
        assert!(Error::SessionClosed("gone".to_string()).is_fatal_to_session());
        assert!(!Error::MalformedEnvelope("bad json".to_string()).is_fatal_to_session());
        assert!(!Error::Negotiation("ice".to_string()).is_fatal_to_session());
        assert!(!Error::DuplicateOffer { state: "AnswerSent".to_string() }.is_fatal_to_session());
    }

    #[test]
    fn test_serde_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
