//! Session description payload codec
//!
//! Descriptions travel inside envelope payloads as standard base64 over their
//! JSON serialization, which keeps SDP line endings byte-exact through text
//! transports.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

/// Encode a value as base64(JSON)
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

/// Decode a base64(JSON) payload. Any failure is reported as a malformed envelope.
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::MalformedEnvelope(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid description payload: {e}")))
}
