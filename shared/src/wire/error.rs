use thiserror::Error;

use crate::crypto::error::CryptoError;

/// Errors raised while parsing a packet kind byte.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketKindError {
    /// Unknown packet kind byte received (may indicate a malformed or
    /// malicious packet)
    #[error("Invalid packet kind byte {value} received (valid range: 0-11)")]
    InvalidKind { value: u8 },
}

/// Errors raised while parsing the header flag bitset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketFlagsError {
    #[error("Unknown flag bits set: {bits:#04x}")]
    UnknownBits { bits: u8 },

    #[error("Asymmetrical and Symmetrical encryption flags are mutually exclusive: {bits:#04x}")]
    ConflictingEncryption { bits: u8 },

    #[error("Encryption flag combined with DoNotEncrypt: {bits:#04x}")]
    EncryptionSuppressed { bits: u8 },
}

/// Errors raised while reading a packet header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("Truncated packet header: {available} bytes available, 14 required")]
    Truncated { available: usize },

    #[error("Negative declared body size: {size}")]
    NegativeSize { size: i32 },

    #[error(transparent)]
    Kind(#[from] PacketKindError),

    #[error(transparent)]
    Flags(#[from] PacketFlagsError),
}

/// Errors raised on the encode path. Nothing is sent when encode fails.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Flags(#[from] PacketFlagsError),

    #[error("Failed to compress body of {body_size} bytes")]
    CompressionFailed { body_size: usize },

    #[error("Encoded packet of {size} bytes exceeds the maximum packet size of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Failed to serialize packet payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors raised on the decode path. A single bad packet is dropped and the
/// session continues, except for a fatally inconsistent size.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// The header demands a cipher the session has not finished establishing.
    /// Plaintext must never be silently passed through in this case.
    #[error("Packet requires {required} encryption but the handshake has not reached that state")]
    EncryptionNotReady { required: &'static str },

    /// Decompression failed (possible malformed or malicious data)
    #[error("Failed to decompress body of {body_size} bytes")]
    DecompressionFailed { body_size: usize },

    /// The header-declared body length does not match the decoded body.
    /// This one is fatal to the session.
    #[error("Declared body size {declared} does not match decoded body size {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("Decoded packet of {size} bytes exceeds the maximum packet size of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Failed to deserialize packet payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl DecodeError {
    /// Whether this decode failure must terminate the session rather than
    /// just drop the offending packet.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::SizeMismatch { .. })
    }
}
