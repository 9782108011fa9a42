//! TCP control channel paired with an untrusted-until-proven UDP channel.
//!
//! Priority packets ride the datagram channel once the binding handshake has
//! completed: the server hands the client a random pass-key over TCP (inside
//! the ServerHello), the client echoes it in a magic-prefixed datagram, and
//! the server echoes that datagram back. Until the echo round-trips, priority
//! traffic falls back to the reliable channel so nothing is lost while the
//! binding is in flight.

use std::{
    net::{SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::Receiver,
        Mutex,
    },
};

use log::{debug, warn};

use crate::transport::{error::TransportError, tcp::TcpTransport, udp::UdpTransport, Transport};

/// Prefix identifying a binding datagram.
pub const BINDING_MAGIC: [u8; 4] = *b"TETH";

/// Magic + big-endian pass-key.
pub fn binding_frame(pass_key: u64) -> [u8; 12] {
    let mut frame = [0u8; 12];
    frame[..4].copy_from_slice(&BINDING_MAGIC);
    frame[4..].copy_from_slice(&pass_key.to_be_bytes());
    frame
}

/// Parse a datagram as a binding frame, if it is one.
pub fn parse_binding(frame: &[u8]) -> Option<u64> {
    if frame.len() != 12 || frame[..4] != BINDING_MAGIC {
        return None;
    }
    let mut key = [0u8; 8];
    key.copy_from_slice(&frame[4..]);
    Some(u64::from_be_bytes(key))
}

/// How datagrams reach this endpoint.
enum UdpLane {
    /// A connected socket owned by this transport (client side).
    Direct(UdpTransport),
    /// A shared socket whose inbound datagrams are routed to us by source
    /// address (server side).
    Routed {
        socket: UdpSocket,
        peer: Mutex<Option<SocketAddr>>,
        inbound: Mutex<Receiver<Vec<u8>>>,
    },
}

pub struct HybridTransport {
    tcp: TcpTransport,
    udp: UdpLane,
    udp_trusted: AtomicBool,
    pass_key: AtomicU64,
}

impl HybridTransport {
    /// Client side: a connected UDP socket next to the TCP stream. The
    /// pass-key is learned later from the ServerHello.
    pub fn client(tcp: TcpTransport, udp: UdpTransport) -> Self {
        Self {
            tcp,
            udp: UdpLane::Direct(udp),
            udp_trusted: AtomicBool::new(false),
            pass_key: AtomicU64::new(0),
        }
    }

    /// Server side: a clone of the shared UDP socket plus the channel the
    /// router feeds this session's datagrams into.
    pub fn routed(
        tcp: TcpTransport,
        socket: UdpSocket,
        inbound: Receiver<Vec<u8>>,
        pass_key: u64,
    ) -> Self {
        Self {
            tcp,
            udp: UdpLane::Routed {
                socket,
                peer: Mutex::new(None),
                inbound: Mutex::new(inbound),
            },
            udp_trusted: AtomicBool::new(false),
            pass_key: AtomicU64::new(pass_key),
        }
    }

    pub fn pass_key(&self) -> u64 {
        self.pass_key.load(Ordering::Acquire)
    }

    /// Adopt the pass-key from the ServerHello and send the binding echo
    /// (client side).
    pub fn bind_udp(&self, pass_key: u64) -> Result<(), TransportError> {
        self.pass_key.store(pass_key, Ordering::Release);
        match &self.udp {
            UdpLane::Direct(udp) => udp.send(&binding_frame(pass_key)),
            UdpLane::Routed { .. } => Ok(()),
        }
    }

    /// Mark the datagram channel proven. The server records the address the
    /// echo came from so it can send back to it.
    pub fn mark_udp_trusted(&self, source: Option<SocketAddr>) {
        if let (UdpLane::Routed { peer, .. }, Some(address)) = (&self.udp, source) {
            *lock(peer) = Some(address);
        }
        self.udp_trusted.store(true, Ordering::Release);
        debug!("Datagram channel bound{}", match source {
            Some(address) => format!(" to {address}"),
            None => String::new(),
        });
    }

    pub fn udp_trusted(&self) -> bool {
        self.udp_trusted.load(Ordering::Acquire)
    }

    fn poll_udp(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match &self.udp {
            UdpLane::Direct(udp) => {
                while let Some(datagram) = udp.recv()? {
                    // The server's echo of our binding frame proves the path
                    if parse_binding(&datagram) == Some(self.pass_key()) {
                        self.mark_udp_trusted(None);
                        continue;
                    }
                    return Ok(Some(datagram));
                }
                Ok(None)
            }
            UdpLane::Routed { inbound, .. } => Ok(lock(inbound).try_recv().ok()),
        }
    }
}

impl Transport for HybridTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.tcp.send(payload)
    }

    fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(payload) = self.tcp.recv()? {
            return Ok(Some(payload));
        }
        self.poll_udp()
    }

    fn max_packet_size(&self) -> usize {
        self.tcp.max_packet_size()
    }

    fn is_stream(&self) -> bool {
        true
    }

    fn has_priority_channel(&self) -> bool {
        self.udp_trusted()
    }

    fn send_priority(&self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.udp_trusted() {
            return self.tcp.send(payload);
        }
        match &self.udp {
            UdpLane::Direct(udp) => {
                // A payload no datagram can carry rides the control channel
                if payload.len() > udp.max_packet_size() {
                    return self.tcp.send(payload);
                }
                udp.send(payload)
            }
            UdpLane::Routed { socket, peer, .. } => {
                let Some(address) = *lock(peer) else {
                    return self.tcp.send(payload);
                };
                match socket.send_to(payload, address) {
                    Ok(_) => Ok(()),
                    Err(error) => {
                        warn!("Datagram send to {address} failed, using control channel: {error}");
                        self.tcp.send(payload)
                    }
                }
            }
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.tcp.peer_addr()
    }

    fn shutdown(&self) {
        self.tcp.shutdown();
        if let UdpLane::Direct(udp) = &self.udp {
            udp.shutdown();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_frame_round_trips() {
        let frame = binding_frame(0xDEAD_BEEF_1234_5678);
        assert_eq!(parse_binding(&frame), Some(0xDEAD_BEEF_1234_5678));
    }

    #[test]
    fn non_binding_datagrams_are_not_parsed() {
        assert_eq!(parse_binding(b"TETH"), None);
        assert_eq!(parse_binding(b"NOPE12345678"), None);
        assert_eq!(parse_binding(&[0u8; 13]), None);
    }

    #[test]
    fn oversized_priority_payloads_use_the_control_channel() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr");
        let stream = std::net::TcpStream::connect(address).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");

        let max = 2 * 1024 * 1024;
        let tcp = TcpTransport::new(stream, max).expect("tcp");
        let receiver = TcpTransport::new(accepted, max).expect("tcp");

        let udp_peer = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let udp = UdpTransport::connect(udp_peer.local_addr().expect("addr")).expect("udp");

        let hybrid = HybridTransport::client(tcp, udp);
        hybrid.mark_udp_trusted(None);
        assert!(hybrid.has_priority_channel());

        // Larger than any datagram: must fall back, not error the session
        let payload = vec![7u8; 70 * 1024];
        hybrid.send_priority(&payload).expect("send");

        let mut received = None;
        for _ in 0..200 {
            if let Some(data) = receiver.recv().expect("recv") {
                received = Some(data);
                break;
            }
        }
        assert_eq!(received.expect("payload arrives on tcp"), payload);
    }
}
