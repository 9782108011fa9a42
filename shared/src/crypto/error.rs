use thiserror::Error;

use crate::crypto::state::EncryptionState;

/// Errors raised by the encryption context and handshake state machine.
///
/// Handshake ordering violations are fatal to the session; the dispatcher
/// disconnects rather than ignoring them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Encryption state may not regress from {from} to {to}")]
    StateRegression {
        from: EncryptionState,
        to: EncryptionState,
    },

    #[error("Failed to generate an asymmetric keypair")]
    KeyGenerationFailed,

    #[error("Failed to import peer public key ({0})")]
    InvalidPeerKey(String),

    #[error("Symmetric key material has the wrong length (key: {key_len}, iv: {iv_len})")]
    InvalidSymmetricKey { key_len: usize, iv_len: usize },

    #[error("Asymmetric encryption requires the peer's public key, which has not been received")]
    PeerKeyMissing,

    #[error("Symmetric encryption requires exchanged key material, which has not been received")]
    SymmetricKeyMissing,

    #[error("Asymmetric encryption failed")]
    AsymmetricFailed,

    #[error("Asymmetric decryption failed (possible malformed or malicious data)")]
    AsymmetricDecryptFailed,

    #[error("Symmetric encryption failed")]
    SymmetricFailed,

    #[error("Symmetric decryption failed (possible malformed or malicious data)")]
    SymmetricDecryptFailed,

    /// SECURITY: only the server may originate symmetric key material.
    #[error("Received a symmetric key message as the server")]
    SymmetricKeyAtServer,

    #[error("Received {message} key material before asymmetric trust was established")]
    KeyMaterialBeforeTrust { message: &'static str },

    #[error("Unexpected encryption handshake message {message} in state {state}")]
    UnexpectedMessage {
        message: &'static str,
        state: EncryptionState,
    },
}

impl CryptoError {
    /// Whether this error must terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CryptoError::SymmetricKeyAtServer
                | CryptoError::KeyMaterialBeforeTrust { .. }
                | CryptoError::UnexpectedMessage { .. }
                | CryptoError::StateRegression { .. }
        )
    }
}
