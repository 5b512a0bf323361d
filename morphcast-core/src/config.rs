use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub webrtc: WebRTCConfig,
    pub upstream: UpstreamConfig,
    pub chat: ChatConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Largest inbound websocket message accepted (bytes)
    pub max_message_size: usize,
    /// Outbound envelopes buffered per viewer before the viewer is considered too slow
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// WebRTC configuration for viewer media sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRTCConfig {
    /// STUN server URLs handed to every peer connection
    pub stun_servers: Vec<String>,
    /// Media packets buffered per viewer before new packets are dropped
    pub media_queue_capacity: usize,
    /// Codec of the upstream video stream, echoed in every answer
    pub video_mime_type: String,
    pub clock_rate: u32,
    /// `MediaStream` id advertised for local tracks
    pub track_stream_id: String,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            media_queue_capacity: 128,
            video_mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            track_stream_id: "morphcast".to_string(),
        }
    }
}

/// Upstream RTP source (an external encoder pushing RTP over UDP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub rtp_listen_addr: String,
    /// SSRC the encoder stamps on its packets; doubles as the stream-binding id
    pub ssrc: u32,
    pub mtu: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            rtp_listen_addr: "127.0.0.1:5004".to_string(),
            ssrc: 12_345_678,
            mtu: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Messages retained and replayed to newly connected viewers
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control events buffered for the virtual-session backend
    pub queue_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            } else {
                return Err(ConfigError::NotFound(path.to_string()));
            }
        }

        // Override with environment variables (MORPHCAST_SERVER__HTTP_PORT, etc.)
        builder = builder.add_source(
            Environment::with_prefix("MORPHCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check every section and collect all problems found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must be non-zero".to_string());
        }
        if self.server.outbound_buffer == 0 {
            errors.push("server.outbound_buffer must be non-zero".to_string());
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            errors.push(format!(
                "logging.level must be one of trace, debug, info, warn, error, got {:?}",
                self.logging.level
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }
        if self.webrtc.media_queue_capacity == 0 {
            errors.push("webrtc.media_queue_capacity must be non-zero".to_string());
        }
        if !self.webrtc.video_mime_type.starts_with("video/") {
            errors.push(format!(
                "webrtc.video_mime_type must be a video codec, got {:?}",
                self.webrtc.video_mime_type
            ));
        }
        if self.webrtc.clock_rate == 0 {
            errors.push("webrtc.clock_rate must be non-zero".to_string());
        }
        if let Some(bad) = self
            .webrtc
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            errors.push(format!("webrtc.stun_servers entry {bad:?} is not a stun: URL"));
        }
        if self.upstream.rtp_listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "upstream.rtp_listen_addr {:?} is not a socket address",
                self.upstream.rtp_listen_addr
            ));
        }
        if self.upstream.mtu < 64 {
            errors.push("upstream.mtu must be at least 64 bytes".to_string());
        }
        if self.control.queue_capacity == 0 {
            errors.push("control.queue_capacity must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
