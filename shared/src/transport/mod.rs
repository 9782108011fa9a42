pub mod error;
pub mod hybrid;
pub mod tcp;
pub mod udp;

pub use error::TransportError;
pub use hybrid::HybridTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use std::net::SocketAddr;

/// Abstraction over a raw byte channel carrying whole packets.
///
/// `recv` is a non-blocking poll: `Ok(None)` means no complete packet is
/// available yet. Implementations serialize writes internally so concurrent
/// senders never interleave mid-packet.
pub trait Transport: Send + Sync {
    /// Write one encoded packet to the channel.
    fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Poll for one complete packet.
    fn recv(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Fixed ceiling on a single encoded packet.
    fn max_packet_size(&self) -> usize;

    /// Whether this channel is stream-oriented (and so length-prefix framed).
    fn is_stream(&self) -> bool;

    /// Whether packets flagged Priority ride a separate low-latency channel.
    fn has_priority_channel(&self) -> bool {
        false
    }

    /// Send on the low-latency channel, falling back to the reliable one.
    fn send_priority(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.send(payload)
    }

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Close the channel. Subsequent sends fail and pending recvs drain.
    fn shutdown(&self);
}
