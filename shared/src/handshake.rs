//! Connect-time hello messages and their validation.
//!
//! The client opens with a `ClientHello` naming its protocol and version; the
//! server validates both against its own configuration and either replies
//! with a `ServerHello` assigning the session id, or disconnects with a
//! human-readable reason. Mismatches are always fatal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    session::connection_state::ConnectionState,
    types::{CustomId, SessionId},
};

/// Body of a ClientHello packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol: String,
    pub version: String,
}

/// Body of a ServerHello packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    /// The id the server assigned to this session.
    pub session_id: SessionId,
    pub protocol: String,
    pub version: String,
    /// Names of the application's custom packet subtypes, by id.
    pub custom_packets: HashMap<CustomId, String>,
    /// Whether the server advertises transport-layer security. Capability
    /// flag only; no upgrade is negotiated here.
    pub ssl: bool,
    /// Pass-key for binding the low-latency datagram channel, when the
    /// server offers one. The client proves the binding by echoing it over
    /// that channel.
    pub udp_pass_key: Option<u64>,
}

/// Body of a ReadyStateUpdate packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStateUpdate {
    pub ready: bool,
}

/// Body of a ConnectionStateUpdate packet. A Disconnected state carries the
/// reason the peer is closing the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateUpdate {
    pub state: ConnectionState,
    pub reason: Option<String>,
}

impl ConnectionStateUpdate {
    pub fn disconnect(reason: &str) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reason: Some(reason.to_string()),
        }
    }
}

/// Connect handshake failures. All of these are fatal to the session; the
/// reason string is delivered to the peer before the transport closes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("Protocol mismatch: server speaks '{expected}', client sent '{received}'")]
    ProtocolMismatch { expected: String, received: String },

    #[error("Version mismatch: server runs '{expected}', client sent '{received}'")]
    VersionMismatch { expected: String, received: String },

    #[error("Server is full ({max_sessions} sessions)")]
    ServerFull { max_sessions: usize },

    #[error("Handshake timed out before the session connected")]
    TimedOut,
}

/// Validate a received ClientHello against the local protocol identity.
pub fn validate_hello(
    protocol: &str,
    version: &str,
    hello: &ClientHello,
) -> Result<(), HandshakeError> {
    if hello.protocol != protocol {
        return Err(HandshakeError::ProtocolMismatch {
            expected: protocol.to_string(),
            received: hello.protocol.clone(),
        });
    }
    if hello.version != version {
        return Err(HandshakeError::VersionMismatch {
            expected: version.to_string(),
            received: hello.version.clone(),
        });
    }
    Ok(())
}
