//! Demultiplexes the server's single UDP socket across sessions.
//!
//! Every session shares one socket; the router owns the receive side. A
//! binding frame (magic + pass-key) proves which session a source address
//! belongs to; after that, datagrams from the address are forwarded to that
//! session's transport and the frame is echoed back so the client knows the
//! path works. Datagrams from unknown addresses are dropped.

use std::{
    collections::HashMap,
    io::ErrorKind,
    net::{SocketAddr, UdpSocket},
    sync::{mpsc::Sender, Mutex, Weak},
    time::Duration,
};

use log::{debug, trace, warn};

use tether_shared::{transport::hybrid, HybridTransport, SessionId};

const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_DATAGRAM_SIZE: usize = 60 * 1024;

struct PendingBinding {
    session: SessionId,
    transport: Weak<HybridTransport>,
    sender: Sender<Vec<u8>>,
}

struct Route {
    session: SessionId,
    sender: Sender<Vec<u8>>,
}

pub struct UdpRouter {
    socket: UdpSocket,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<u64, PendingBinding>,
    routes: HashMap<SocketAddr, Route>,
}

impl UdpRouter {
    pub fn bind(address: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        Ok(Self {
            socket,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// A clone of the shared socket for a session's send side.
    pub fn socket_clone(&self) -> std::io::Result<UdpSocket> {
        self.socket.try_clone()
    }

    /// Register a freshly accepted session's pass-key before its ServerHello
    /// goes out.
    pub fn register(
        &self,
        pass_key: u64,
        session: SessionId,
        transport: Weak<HybridTransport>,
        sender: Sender<Vec<u8>>,
    ) {
        self.lock().pending.insert(
            pass_key,
            PendingBinding {
                session,
                transport,
                sender,
            },
        );
    }

    /// Drop all routing state for a departed session.
    pub fn forget_session(&self, session: SessionId) {
        let mut inner = self.lock();
        inner.pending.retain(|_, binding| binding.session != session);
        inner.routes.retain(|_, route| route.session != session);
    }

    /// Receive and route one datagram, if any arrived within the poll window.
    pub fn poll(&self) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let (count, source) = match self.socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                return;
            }
            Err(err) => {
                warn!("Datagram receive failed: {err}");
                return;
            }
        };
        let datagram = &buffer[..count];

        if let Some(pass_key) = hybrid::parse_binding(datagram) {
            self.complete_binding(pass_key, source, datagram);
            return;
        }

        let mut inner = self.lock();
        match inner.routes.get(&source) {
            Some(route) => {
                if route.sender.send(datagram.to_vec()).is_err() {
                    // Session is gone; stop routing to it
                    inner.routes.remove(&source);
                }
            }
            None => {
                trace!("Dropping datagram from unbound address {source}");
            }
        }
    }

    fn complete_binding(&self, pass_key: u64, source: SocketAddr, datagram: &[u8]) {
        let binding = self.lock().pending.remove(&pass_key);
        let Some(binding) = binding else {
            debug!("Binding frame from {source} with unknown pass-key");
            return;
        };
        let Some(transport) = binding.transport.upgrade() else {
            return;
        };
        transport.mark_udp_trusted(Some(source));
        self.lock().routes.insert(
            source,
            Route {
                session: binding.session,
                sender: binding.sender,
            },
        );
        // Echo proves the path to the client
        if let Err(err) = self.socket.send_to(datagram, source) {
            warn!("Could not echo binding frame to {source}: {err}");
        }
        debug!("Session {} bound its datagram channel at {source}", binding.session);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
