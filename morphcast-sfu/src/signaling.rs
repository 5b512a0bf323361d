//! Offer/answer handshake for one viewer session
//!
//! An inbound OFFER carries a base64(JSON) session description. Negotiation
//! decodes it, builds a peer connection with one local video track, and
//! returns the matching ANSWER envelope once ICE gathering is complete.
//! Answers are never trickled.

use std::sync::Arc;

use morphcast_core::{codec, models::PacketEnvelope, Error, Result};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use crate::config::RelayConfig;
use crate::peer::RelayPeer;
use crate::track::local_video_track;
use crate::types::NegotiationState;

/// Runs the handshake for sessions of one relay
pub struct Negotiator {
    api: API,
    rtc_config: RTCConfiguration,
    config: Arc<RelayConfig>,
}

impl Negotiator {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("failed to register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| Error::Negotiation(format!("failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }]
        };

        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
            config: Arc::new(config),
        })
    }

    /// Negotiate media for `peer` from an inbound OFFER envelope
    ///
    /// Only a session that has never seen an offer is accepted; any later
    /// offer fails with `DuplicateOffer` and leaves the bound track alone.
    /// A payload that does not decode leaves the session at `None`. Failures
    /// after that keep the state reached so far and close the half-built
    /// connection.
    pub async fn negotiate(
        &self,
        peer: &RelayPeer,
        offer: &PacketEnvelope,
    ) -> Result<PacketEnvelope> {
        if peer.is_closed() {
            return Err(Error::SessionClosed(peer.id.to_string()));
        }
        let state = peer.negotiation_state();
        if state != NegotiationState::None {
            return Err(Error::DuplicateOffer {
                state: state.to_string(),
            });
        }

        let remote: RTCSessionDescription = codec::decode(&offer.data)?;
        if remote.sdp_type != RTCSdpType::Offer {
            return Err(Error::MalformedEnvelope(format!(
                "expected an offer description, got {}",
                remote.sdp_type
            )));
        }
        peer.advance(NegotiationState::None, NegotiationState::OfferReceived)?;

        let connection = self.new_connection(peer).await?;
        match self.complete(peer, &connection, remote).await {
            Ok(answer) => {
                info!(session_id = %peer.id, "Negotiation complete, answer ready");
                Ok(answer)
            }
            Err(e) => {
                warn!(
                    session_id = %peer.id,
                    state = %peer.negotiation_state(),
                    error = %e,
                    "Negotiation failed, session continues without media"
                );
                peer.detach_connection();
                if let Err(close_err) = connection.close().await {
                    debug!(session_id = %peer.id, error = %close_err, "Closing failed connection");
                }
                Err(e)
            }
        }
    }

    async fn new_connection(&self, peer: &RelayPeer) -> Result<Arc<RTCPeerConnection>> {
        let connection = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config.clone())
                .await
                .map_err(|e| {
                    Error::Negotiation(format!("failed to create peer connection: {e}"))
                })?,
        );

        let session_id = peer.id.clone();
        connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let session_id = session_id.clone();
                Box::pin(async move {
                    if matches!(
                        state,
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
                    ) {
                        warn!(session_id = %session_id, state = %state, "Peer connection degraded");
                    } else {
                        info!(session_id = %session_id, state = %state, "Peer connection state");
                    }
                })
            },
        ));

        peer.attach_connection(Arc::clone(&connection));
        Ok(connection)
    }

    async fn video_sender(connection: &RTCPeerConnection) -> Result<Arc<RTCRtpSender>> {
        for transceiver in connection.get_transceivers().await {
            if transceiver.kind() == RTPCodecType::Video {
                return Ok(transceiver.sender().await);
            }
        }
        Err(Error::Negotiation("offer has no video m-line".to_string()))
    }

    async fn complete(
        &self,
        peer: &RelayPeer,
        connection: &Arc<RTCPeerConnection>,
        remote: RTCSessionDescription,
    ) -> Result<PacketEnvelope> {
        connection
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to apply offer: {e}")))?;

        // The offer's video m-line already has a transceiver; its sender carries our track
        let rtp_sender = Self::video_sender(connection).await?;
        let track = local_video_track(&self.config);
        rtp_sender
            .replace_track(Some(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::Negotiation(format!("failed to attach track: {e}")))?;

        // RTCP from the viewer has to be read for interceptors to run
        let closed = peer.closed_token();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    () = closed.cancelled() => break,
                    read = rtp_sender.read(&mut buf) => if read.is_err() { break },
                }
            }
        });
        peer.advance(NegotiationState::OfferReceived, NegotiationState::TrackBound)?;

        let answer = connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to create answer: {e}")))?;

        let mut gathering_complete = connection.gathering_complete_promise().await;
        connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set local description: {e}")))?;
        let _ = gathering_complete.recv().await;

        let local = connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::Negotiation("local description missing after gathering".to_string())
            })?;
        let payload = codec::encode(&local)?;

        peer.advance(NegotiationState::TrackBound, NegotiationState::AnswerSent)?;
        peer.bind_track(track)?;
        Ok(PacketEnvelope::answer(payload))
    }
}
