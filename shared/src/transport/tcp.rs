use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use crate::{
    constants::DEFAULT_MAX_PACKET_SIZE,
    transport::{error::TransportError, Transport},
};

const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const LENGTH_PREFIX_SIZE: usize = 4;

/// Stream transport over TCP. Each packet is framed as a 4-byte big-endian
/// length followed by the encoded header + body.
///
/// The stream is cloned into separate reader and writer halves so a blocked
/// read never stalls a send; each half serializes access with its own lock.
pub struct TcpTransport {
    reader: Mutex<ReadHalf>,
    writer: Mutex<TcpStream>,
    peer: SocketAddr,
    max_packet_size: usize,
    shut_down: AtomicBool,
}

struct ReadHalf {
    stream: TcpStream,
    // Partial frame carried across polls
    buffer: Vec<u8>,
    expected: Option<usize>,
}

impl TcpTransport {
    /// Wrap an accepted or connected stream.
    pub fn new(stream: TcpStream, max_packet_size: usize) -> Result<Self, TransportError> {
        let peer = stream
            .peer_addr()
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        stream
            .set_read_timeout(Some(POLL_TIMEOUT))
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        let reader = stream
            .try_clone()
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        Ok(Self {
            reader: Mutex::new(ReadHalf {
                stream: reader,
                buffer: Vec::new(),
                expected: None,
            }),
            writer: Mutex::new(stream),
            peer,
            max_packet_size,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Connect to a remote listener.
    pub fn connect(address: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(address)
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        Self::new(stream, DEFAULT_MAX_PACKET_SIZE)
    }
}

impl Transport for TcpTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShutDown);
        }
        if payload.len() > self.max_packet_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_packet_size,
            });
        }
        // One packet at a time under the write lock: never interleaved
        // mid-write
        let mut writer = self.writer.lock().map_err(|_| TransportError::ShutDown)?;
        let length = (payload.len() as u32).to_be_bytes();
        writer
            .write_all(&length)
            .and_then(|_| writer.write_all(payload))
            .map_err(|err| match err.kind() {
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => TransportError::Disconnected,
                _ => TransportError::SendFailed(err.to_string()),
            })
    }

    fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::ShutDown);
        }
        let mut half = self.reader.lock().map_err(|_| TransportError::ShutDown)?;
        loop {
            // Parse the length prefix once enough bytes have accumulated
            if half.expected.is_none() && half.buffer.len() >= LENGTH_PREFIX_SIZE {
                let mut length = [0u8; LENGTH_PREFIX_SIZE];
                length.copy_from_slice(&half.buffer[..LENGTH_PREFIX_SIZE]);
                let length = u32::from_be_bytes(length) as usize;
                if length > self.max_packet_size {
                    return Err(TransportError::FrameTooLarge {
                        size: length,
                        max: self.max_packet_size,
                    });
                }
                half.buffer.drain(..LENGTH_PREFIX_SIZE);
                half.expected = Some(length);
            }
            if let Some(expected) = half.expected {
                if half.buffer.len() >= expected {
                    let frame = half.buffer.drain(..expected).collect();
                    half.expected = None;
                    return Ok(Some(frame));
                }
            }

            let mut chunk = [0u8; 4096];
            match half.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(count) => half.buffer.extend_from_slice(&chunk[..count]),
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(err) if err.kind() == ErrorKind::ConnectionReset => {
                    return Err(TransportError::Disconnected);
                }
                Err(err) => return Err(TransportError::RecvFailed(err.to_string())),
            }
        }
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn is_stream(&self) -> bool {
        true
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr");
        let client = TcpTransport::connect(address).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");
        let server = TcpTransport::new(accepted, DEFAULT_MAX_PACKET_SIZE).expect("wrap");
        (client, server)
    }

    fn recv_blocking(transport: &TcpTransport) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(frame) = transport.recv()? {
                return Ok(frame);
            }
        }
    }

    #[test]
    fn frames_survive_the_stream() {
        let (client, server) = pair();
        client.send(b"first packet").expect("send");
        client.send(b"second").expect("send");
        assert_eq!(recv_blocking(&server).expect("recv"), b"first packet");
        assert_eq!(recv_blocking(&server).expect("recv"), b"second");
    }

    #[test]
    fn oversized_frame_is_refused_locally() {
        let (client, _server) = pair();
        let oversized = vec![0u8; DEFAULT_MAX_PACKET_SIZE + 1];
        assert!(matches!(
            client.send(&oversized),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn peer_close_is_reported() {
        let (client, server) = pair();
        client.shutdown();
        let mut result = server.recv();
        while let Ok(None) = result {
            result = server.recv();
        }
        assert!(matches!(
            result,
            Err(TransportError::Disconnected) | Err(TransportError::RecvFailed(_))
        ));
    }
}
