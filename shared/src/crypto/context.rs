use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey},
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;

use crate::crypto::{error::CryptoError, state::EncryptionState};

const RSA_BITS: usize = 2048;
const RSA_BLOCK_SIZE: usize = RSA_BITS / 8;
// OAEP with SHA-256 costs 2 * 32 + 2 bytes of each block
const RSA_PLAINTEXT_LIMIT: usize = RSA_BLOCK_SIZE - 66;

pub const SYMMETRIC_KEY_SIZE: usize = 32;
pub const SYMMETRIC_IV_SIZE: usize = 12;
const NONCE_SIZE: usize = 12;

/// Per-session asymmetric/symmetric key material and handshake state.
///
/// Owned exclusively by its Session; never shared between sessions. The local
/// keypair is generated lazily on first use, so sessions that never negotiate
/// encryption pay nothing.
pub struct EncryptionContext {
    keypair: Option<RsaPrivateKey>,
    peer_public: Option<RsaPublicKey>,
    symmetric: Option<SymmetricMaterial>,
    state: EncryptionState,
}

struct SymmetricMaterial {
    key: [u8; SYMMETRIC_KEY_SIZE],
    iv: [u8; SYMMETRIC_IV_SIZE],
}

impl Default for EncryptionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionContext {
    pub fn new() -> Self {
        Self {
            keypair: None,
            peer_public: None,
            symmetric: None,
            state: EncryptionState::Disabled,
        }
    }

    pub fn state(&self) -> EncryptionState {
        self.state
    }

    pub fn advance_to(&mut self, next: EncryptionState) -> Result<(), CryptoError> {
        self.state.advance_to(next)
    }

    pub fn has_peer_key(&self) -> bool {
        self.peer_public.is_some()
    }

    pub fn has_symmetric_key(&self) -> bool {
        self.symmetric.is_some()
    }

    /// The local public key as PKCS#1 DER, generating the keypair on first
    /// use.
    pub fn local_public_key_der(&mut self) -> Result<Vec<u8>, CryptoError> {
        let keypair = self.keypair()?;
        let public = RsaPublicKey::from(keypair);
        public
            .to_pkcs1_der()
            .map(|der| der.as_bytes().to_vec())
            .map_err(|_| CryptoError::KeyGenerationFailed)
    }

    /// Import the peer's public key from PKCS#1 DER.
    pub fn import_peer_key(&mut self, der: &[u8]) -> Result<(), CryptoError> {
        let key = RsaPublicKey::from_pkcs1_der(der)
            .map_err(|err| CryptoError::InvalidPeerKey(err.to_string()))?;
        self.peer_public = Some(key);
        Ok(())
    }

    /// Generate a fresh symmetric key + IV, keeping a copy locally.
    pub fn generate_symmetric(&mut self) -> (Vec<u8>, Vec<u8>) {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        let mut iv = [0u8; SYMMETRIC_IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        self.symmetric = Some(SymmetricMaterial { key, iv });
        (key.to_vec(), iv.to_vec())
    }

    /// Import symmetric key material received from the peer.
    pub fn import_symmetric(&mut self, key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
        if key.len() != SYMMETRIC_KEY_SIZE || iv.len() != SYMMETRIC_IV_SIZE {
            return Err(CryptoError::InvalidSymmetricKey {
                key_len: key.len(),
                iv_len: iv.len(),
            });
        }
        let mut material = SymmetricMaterial {
            key: [0u8; SYMMETRIC_KEY_SIZE],
            iv: [0u8; SYMMETRIC_IV_SIZE],
        };
        material.key.copy_from_slice(key);
        material.iv.copy_from_slice(iv);
        self.symmetric = Some(material);
        Ok(())
    }

    /// RSA-OAEP encrypt to the peer, chunking the plaintext to the OAEP
    /// block limit.
    pub fn encrypt_asymmetric(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer = self.peer_public.as_ref().ok_or(CryptoError::PeerKeyMissing)?;
        let mut rng = OsRng;
        let mut output = Vec::with_capacity(plaintext.len() + RSA_BLOCK_SIZE);
        for chunk in plaintext.chunks(RSA_PLAINTEXT_LIMIT) {
            let block = peer
                .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                .map_err(|_| CryptoError::AsymmetricFailed)?;
            output.extend_from_slice(&block);
        }
        if plaintext.is_empty() {
            let block = peer
                .encrypt(&mut rng, Oaep::new::<Sha256>(), &[])
                .map_err(|_| CryptoError::AsymmetricFailed)?;
            output.extend_from_slice(&block);
        }
        Ok(output)
    }

    /// RSA-OAEP decrypt with the local keypair.
    pub fn decrypt_asymmetric(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % RSA_BLOCK_SIZE != 0 {
            return Err(CryptoError::AsymmetricDecryptFailed);
        }
        let keypair = self.keypair()?;
        let mut output = Vec::with_capacity(ciphertext.len());
        for block in ciphertext.chunks(RSA_BLOCK_SIZE) {
            let chunk = keypair
                .decrypt(Oaep::new::<Sha256>(), block)
                .map_err(|_| CryptoError::AsymmetricDecryptFailed)?;
            output.extend_from_slice(&chunk);
        }
        Ok(output)
    }

    /// ChaCha20-Poly1305 encrypt under the exchanged key. A fresh random
    /// nonce is prepended to the ciphertext; the exchanged IV binds both
    /// sides as associated data.
    pub fn encrypt_symmetric(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let material = self.symmetric.as_ref().ok_or(CryptoError::SymmetricKeyMissing)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&material.key));
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &material.iv,
                },
            )
            .map_err(|_| CryptoError::SymmetricFailed)?;
        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// ChaCha20-Poly1305 decrypt under the exchanged key.
    pub fn decrypt_symmetric(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let material = self.symmetric.as_ref().ok_or(CryptoError::SymmetricKeyMissing)?;
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::SymmetricDecryptFailed);
        }
        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&material.key));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: &material.iv,
                },
            )
            .map_err(|_| CryptoError::SymmetricDecryptFailed)
    }

    fn keypair(&mut self) -> Result<&RsaPrivateKey, CryptoError> {
        if self.keypair.is_none() {
            let mut rng = OsRng;
            let keypair = RsaPrivateKey::new(&mut rng, RSA_BITS)
                .map_err(|_| CryptoError::KeyGenerationFailed)?;
            self.keypair = Some(keypair);
        }
        // The Option was just filled above
        self.keypair.as_ref().ok_or(CryptoError::KeyGenerationFailed)
    }
}
