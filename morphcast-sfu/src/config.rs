//! Relay Configuration

use morphcast_core::config::WebRTCConfig;
use serde::{Deserialize, Serialize};

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Stream-binding id (SSRC) of the upstream stream every session relays
    pub stream_binding_id: u32,
    /// Packets buffered per session before new packets are dropped
    pub media_queue_capacity: usize,
    /// STUN servers for viewer peer connections
    pub stun_servers: Vec<String>,
    /// Codec of local tracks (must match the upstream encoder)
    pub video_mime_type: String,
    pub clock_rate: u32,
    /// `MediaStream` id of local tracks
    pub track_stream_id: String,
}

impl RelayConfig {
    #[must_use]
    pub fn from_webrtc(webrtc: &WebRTCConfig, stream_binding_id: u32) -> Self {
        Self {
            stream_binding_id,
            media_queue_capacity: webrtc.media_queue_capacity,
            stun_servers: webrtc.stun_servers.clone(),
            video_mime_type: webrtc.video_mime_type.clone(),
            clock_rate: webrtc.clock_rate,
            track_stream_id: webrtc.track_stream_id.clone(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_webrtc(&WebRTCConfig::default(), 0)
    }
}
