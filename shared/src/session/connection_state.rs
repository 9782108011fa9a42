use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one session, local or remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    /// Transport is up, hello (and optionally encryption) in flight.
    Handshake,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Handshake => "Handshake",
            ConnectionState::Connected => "Connected",
        };
        write!(f, "{name}")
    }
}
