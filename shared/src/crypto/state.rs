use crate::crypto::error::CryptoError;

/// The per-session encryption handshake state. Only ever advances forward;
/// the sole way back to Disabled is full session teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncryptionState {
    /// No encryption negotiated.
    Disabled,
    /// A public key has been sent and the reply is pending.
    Handshake,
    /// Both sides hold each other's public keys.
    AsymmetricalReady,
    /// The symmetric key + IV have been exchanged.
    SymmetricalReady,
    /// The handshake is acknowledged complete on this side.
    Encrypted,
}

impl EncryptionState {
    /// Move to `next`, rejecting any backwards transition.
    pub fn advance_to(&mut self, next: EncryptionState) -> Result<(), CryptoError> {
        if next < *self {
            return Err(CryptoError::StateRegression {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn asymmetric_ready(self) -> bool {
        self >= EncryptionState::AsymmetricalReady
    }

    pub fn symmetric_ready(self) -> bool {
        self >= EncryptionState::SymmetricalReady
    }
}

impl std::fmt::Display for EncryptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncryptionState::Disabled => "Disabled",
            EncryptionState::Handshake => "Handshake",
            EncryptionState::AsymmetricalReady => "AsymmetricalReady",
            EncryptionState::SymmetricalReady => "SymmetricalReady",
            EncryptionState::Encrypted => "Encrypted",
        };
        f.write_str(name)
    }
}
