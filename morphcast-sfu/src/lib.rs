//! Morphcast media relay
//!
//! Fans a single upstream RTP stream out to every connected viewer over WebRTC.
//!
//! ## Architecture
//!
//! - **`SessionRegistry`**: the set of live viewer sessions
//! - **`RelayPeer`**: one viewer's negotiation state, packet queue and track
//! - **`Negotiator`**: offer/answer handshake producing a bound local track
//! - **`MediaBroadcaster`**: pulls upstream packets and fans them out
//! - **`UpstreamSource`**: where packets come from (`UdpRtpSource` in production)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use morphcast_sfu::{MediaBroadcaster, Negotiator, RelayConfig, SessionRegistry, UdpRtpSource};
//!
//! let config = RelayConfig::from_webrtc(&app_config.webrtc, app_config.upstream.ssrc);
//! let registry = SessionRegistry::new(config.clone());
//! let negotiator = Negotiator::new(config)?;
//!
//! let source = UdpRtpSource::bind("127.0.0.1:5004", app_config.upstream.ssrc, 1500).await?;
//! MediaBroadcaster::new(registry.clone(), shutdown.clone()).spawn(source);
//!
//! let peer = registry.connect();
//! let answer = negotiator.negotiate(&peer, &offer_envelope).await?;
//! ```

mod broadcaster;
mod config;
mod peer;
mod registry;
mod signaling;
mod track;
mod types;
mod upstream;

pub use broadcaster::{BroadcastSummary, MediaBroadcaster};
pub use config::RelayConfig;
pub use peer::{PeerStats, RelayPeer};
pub use registry::{BroadcastReport, RegistryStats, SessionRegistry};
pub use signaling::Negotiator;
pub use track::{local_video_track, MediaSink, TrackStats};
pub use types::{ForwardOutcome, NegotiationState, SharedPacket};
pub use upstream::{ChannelSource, UdpRtpSource, UpstreamSource};

/// Re-exported so callers can build packets without depending on webrtc directly
pub use webrtc::rtp::packet::Packet;
