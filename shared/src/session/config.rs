use std::time::Duration;

use crate::{
    constants::{
        COMPRESSION_LEVEL, DEFAULT_ENCRYPTION_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT,
        DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_MAX_PACKET_SIZE,
    },
    wire::codec::CodecConfig,
};

/// Whether a session negotiates packet encryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Never negotiate; all packets travel in the clear.
    Disabled,
    /// Negotiate if the peer initiates, continue unencrypted otherwise.
    Request,
    /// Initiate, and disconnect if the handshake does not complete in time.
    Required,
}

/// Per-session knobs shared by client and server sessions.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub max_packet_size: usize,
    pub compression_level: i32,
    /// Idle interval after which a keepalive packet is sent.
    pub keepalive_interval: Duration,
    /// Sessions not Connected within this window are dropped.
    pub handshake_timeout: Duration,
    /// An encryption handshake not asymmetric-ready within this window drops
    /// the session.
    pub encryption_timeout: Duration,
    pub encryption: EncryptionMode,
    /// How long a blocking invoke waits before yielding Null.
    pub invoke_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            compression_level: COMPRESSION_LEVEL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            encryption_timeout: DEFAULT_ENCRYPTION_TIMEOUT,
            encryption: EncryptionMode::Request,
            invoke_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionConfig {
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            max_packet_size: self.max_packet_size,
            compression_level: self.compression_level,
        }
    }
}
