use thiserror::Error;

use tether_shared::{EncodeError, ReplicationError, SessionError, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("Server refused the connection: {reason}")]
    Refused { reason: String },

    #[error("Timed out waiting for the server hello")]
    HelloTimeout,

    #[error("Not connected")]
    NotConnected,
}
