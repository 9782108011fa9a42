use thiserror::Error;

use crate::{
    transport::TransportError,
    wire::error::{DecodeError, EncodeError},
};

/// Errors on a session's send or receive path. Transport and fatal decode
/// errors tear the session down; the rest are logged and the offending packet
/// dropped.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Session is shutting down")]
    ShuttingDown,
}
