use std::{
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::transport::{error::TransportError, Transport};

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

// Conservative ceiling for a single datagram
const MAX_DATAGRAM_SIZE: usize = 60 * 1024;

/// Datagram transport over a connected UDP socket: one packet per datagram,
/// no framing.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    shut_down: AtomicBool,
}

impl UdpTransport {
    /// Bind an ephemeral local socket and connect it to the peer.
    pub fn connect(address: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        socket
            .connect(address)
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        socket
            .set_read_timeout(Some(POLL_TIMEOUT))
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        Ok(Self {
            socket,
            peer: address,
            shut_down: AtomicBool::new(false),
        })
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShutDown);
        }
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.socket
            .send(payload)
            .map(|_| ())
            .map_err(|err| TransportError::SendFailed(err.to_string()))
    }

    fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShutDown);
        }
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        match self.socket.recv(&mut buffer) {
            Ok(count) => Ok(Some(buffer[..count].to_vec())),
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(TransportError::RecvFailed(err.to_string())),
        }
    }

    fn max_packet_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }

    fn is_stream(&self) -> bool {
        false
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_round_trip() {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let address = receiver.local_addr().expect("addr");
        let transport = UdpTransport::connect(address).expect("connect");
        transport.send(b"one datagram").expect("send");

        let mut buffer = [0u8; 1500];
        let (count, _) = receiver.recv_from(&mut buffer).expect("recv");
        assert_eq!(&buffer[..count], b"one datagram");
    }

    #[test]
    fn shutdown_stops_io() {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let transport = UdpTransport::connect(receiver.local_addr().expect("addr")).expect("connect");
        transport.shutdown();
        assert!(matches!(transport.send(b"x"), Err(TransportError::ShutDown)));
        assert!(matches!(transport.recv(), Err(TransportError::ShutDown)));
    }
}
