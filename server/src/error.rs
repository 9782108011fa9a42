use thiserror::Error;

use tether_shared::{
    EncodeError, HandshakeError, RegistryError, ReplicationError, SessionError, SessionId,
    TransportError,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("No session with id {session}")]
    UnknownSession { session: SessionId },

    #[error("Server is shutting down")]
    ShuttingDown,
}
