use thiserror::Error;

/// Errors raised by the raw byte transports. Any of these tears the session
/// down; framing-level problems inside a packet are DecodeErrors instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Failed to read from the transport: {0}")]
    RecvFailed(String),

    #[error("Failed to write to the transport: {0}")]
    SendFailed(String),

    #[error("The peer closed the connection")]
    Disconnected,

    #[error("The transport has been shut down")]
    ShutDown,

    #[error("Frame of {size} bytes exceeds the transport's maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
}
