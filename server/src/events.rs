use std::collections::VecDeque;

use tether_shared::{NetworkId, Packet, SessionId};

/// Everything of note that happened on the server since the last
/// `Server::receive()`.
#[derive(Debug)]
pub enum ServerEvent {
    /// A session completed the hello handshake.
    Connected(SessionId),
    Disconnected {
        session: SessionId,
        reason: Option<String>,
    },
    /// A session was marked ready (by policy or by the peer's announcement).
    Ready(SessionId),
    /// A session completed the encryption key exchange.
    EncryptionEstablished(SessionId),
    /// An application packet no registered listener consumed.
    Custom {
        session: SessionId,
        packet: Packet,
    },
    ObjectCreated {
        session: SessionId,
        network_id: NetworkId,
    },
    /// A peer confirmed an announced object live.
    ObjectConfirmed {
        session: SessionId,
        network_id: NetworkId,
    },
    ObjectDestroyed {
        session: SessionId,
        network_id: NetworkId,
    },
    ObjectModified {
        session: SessionId,
        network_id: NetworkId,
    },
    /// A sync-var batch from a session was applied (and relayed).
    SyncVars {
        session: SessionId,
        applied: usize,
        denied: usize,
    },
    Stream {
        session: SessionId,
        stream_id: i32,
        data: Vec<u8>,
    },
}

/// Drained event queue handed to the application each `receive()`.
#[derive(Debug, Default)]
pub struct Events {
    queue: VecDeque<ServerEvent>,
}

impl Events {
    pub(crate) fn from_queue(queue: VecDeque<ServerEvent>) -> Self {
        Self { queue }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Iterator for Events {
    type Item = ServerEvent;

    fn next(&mut self) -> Option<ServerEvent> {
        self.queue.pop_front()
    }
}
