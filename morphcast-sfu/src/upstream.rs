//! Upstream media sources
//!
//! The broadcaster pulls RTP packets from a single upstream stream. In
//! production that is an encoder pushing RTP over UDP.

use std::io::ErrorKind;

use async_trait::async_trait;
use morphcast_core::{Error, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;
use webrtc::util::Unmarshal;

/// A pull-based stream of RTP packets
///
/// `recv` returns `None` once the stream is exhausted and will not yield
/// again.
#[async_trait]
pub trait UpstreamSource: Send {
    /// SSRC of the stream this source carries
    fn stream_binding_id(&self) -> u32;

    async fn recv(&mut self) -> Option<Packet>;
}

/// RTP-over-UDP listener
///
/// Datagrams that do not parse as RTP, or carry a different SSRC, are
/// discarded.
pub struct UdpRtpSource {
    socket: UdpSocket,
    ssrc: u32,
    buf: Vec<u8>,
    discarded: u64,
}

impl UdpRtpSource {
    pub async fn bind(addr: &str, ssrc: u32, mtu: usize) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("failed to bind RTP listener on {addr}: {e}")))?;
        info!(addr = %addr, ssrc = ssrc, "Listening for upstream RTP");
        Ok(Self {
            socket,
            ssrc,
            buf: vec![0u8; mtu],
            discarded: 0,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Datagrams dropped so far for not being RTP of the bound stream
    #[must_use]
    pub const fn discarded(&self) -> u64 {
        self.discarded
    }
}

#[async_trait]
impl UpstreamSource for UdpRtpSource {
    fn stream_binding_id(&self) -> u32 {
        self.ssrc
    }

    async fn recv(&mut self) -> Option<Packet> {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.buf).await {
                Ok(received) => received,
                Err(e) if is_transient(e.kind()) => {
                    debug!(error = %e, "Transient RTP socket error");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "RTP socket failed");
                    return None;
                }
            };

            let mut raw = &self.buf[..len];
            match Packet::unmarshal(&mut raw) {
                Ok(packet) if packet.header.ssrc == self.ssrc => return Some(packet),
                Ok(packet) => {
                    self.discarded += 1;
                    debug!(
                        from = %from,
                        ssrc = packet.header.ssrc,
                        "Dropping RTP from unexpected stream"
                    );
                }
                Err(e) => {
                    self.discarded += 1;
                    debug!(from = %from, error = %e, "Dropping datagram that is not RTP");
                }
            }
        }
    }
}

const fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
    )
}

/// In-process source fed through a channel
///
/// Exhausted once every sender is dropped.
pub struct ChannelSource {
    ssrc: u32,
    packets: mpsc::Receiver<Packet>,
}

impl ChannelSource {
    #[must_use]
    pub fn new(ssrc: u32, capacity: usize) -> (mpsc::Sender<Packet>, Self) {
        let (tx, packets) = mpsc::channel(capacity.max(1));
        (tx, Self { ssrc, packets })
    }
}

#[async_trait]
impl UpstreamSource for ChannelSource {
    fn stream_binding_id(&self) -> u32 {
        self.ssrc
    }

    async fn recv(&mut self) -> Option<Packet> {
        self.packets.recv().await
    }
}
