//! The encryption key-exchange state machine.
//!
//! Either side may initiate by sending its public key (the server does so for
//! EncryptionMode::Required, a client does so on request). The receiver
//! acknowledges with its own public key, after which both sides are
//! AsymmetricalReady. The server then sends a freshly generated symmetric
//! key + IV inside a packet whose packet-level flag is Asymmetrical, so the
//! key rides under RSA and never crosses in the clear. The importing side
//! acknowledges and both ends mark themselves Encrypted.
//!
//! Ordering violations are fatal: a symmetric key arriving at the server, or
//! any key material arriving before asymmetric trust, disconnects the session.

use serde::{Deserialize, Serialize};

use crate::{
    crypto::{context::EncryptionContext, error::CryptoError, state::EncryptionState},
    types::HostType,
};

/// Body of an `Encryption` packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMessage {
    /// The sender's public key, PKCS#1 DER.
    PublicKey { der: Vec<u8> },
    /// Acknowledges a received public key, carrying the responder's own key
    /// so both sides can encrypt asymmetrically.
    PublicKeyAck { der: Vec<u8> },
    /// Fresh symmetric key material, generated by the server only.
    SymmetricKey { key: Vec<u8>, iv: Vec<u8> },
    /// Acknowledges the symmetric key import.
    SymmetricKeyAck,
}

impl EncryptionMessage {
    fn name(&self) -> &'static str {
        match self {
            EncryptionMessage::PublicKey { .. } => "PublicKey",
            EncryptionMessage::PublicKeyAck { .. } => "PublicKeyAck",
            EncryptionMessage::SymmetricKey { .. } => "SymmetricKey",
            EncryptionMessage::SymmetricKeyAck => "SymmetricKeyAck",
        }
    }
}

/// A handshake message to send, and whether it must be protected by the
/// asymmetric cipher (true only for the symmetric key itself; the rest of the
/// handshake travels with DoNotEncrypt).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEncryption {
    pub message: EncryptionMessage,
    pub protect: bool,
}

impl OutboundEncryption {
    fn plain(message: EncryptionMessage) -> Self {
        Self {
            message,
            protect: false,
        }
    }

    fn protected(message: EncryptionMessage) -> Self {
        Self {
            message,
            protect: true,
        }
    }
}

/// Start the handshake on this side: advance to Handshake and emit our public
/// key.
pub fn begin(ctx: &mut EncryptionContext) -> Result<OutboundEncryption, CryptoError> {
    let der = ctx.local_public_key_der()?;
    ctx.advance_to(EncryptionState::Handshake)?;
    Ok(OutboundEncryption::plain(EncryptionMessage::PublicKey {
        der,
    }))
}

/// Feed one received handshake message through the state machine, returning
/// the messages to send back. Errors where `is_fatal()` holds must tear the
/// session down.
pub fn handle_message(
    ctx: &mut EncryptionContext,
    host: HostType,
    message: EncryptionMessage,
) -> Result<Vec<OutboundEncryption>, CryptoError> {
    match message {
        EncryptionMessage::PublicKey { der } => {
            ctx.import_peer_key(&der)?;
            let own_der = ctx.local_public_key_der()?;
            if ctx.state() < EncryptionState::AsymmetricalReady {
                ctx.advance_to(EncryptionState::AsymmetricalReady)?;
            }
            let mut replies = vec![OutboundEncryption::plain(
                EncryptionMessage::PublicKeyAck { der: own_der },
            )];
            if host.is_server() && !ctx.state().symmetric_ready() {
                replies.push(server_symmetric_key(ctx)?);
            }
            Ok(replies)
        }
        EncryptionMessage::PublicKeyAck { der } => {
            if ctx.state() < EncryptionState::Handshake {
                return Err(CryptoError::UnexpectedMessage {
                    message: "PublicKeyAck",
                    state: ctx.state(),
                });
            }
            ctx.import_peer_key(&der)?;
            // When both ends initiated, the key was already trusted while
            // handling the peer's PublicKey; the ack then changes nothing
            if ctx.state() < EncryptionState::AsymmetricalReady {
                ctx.advance_to(EncryptionState::AsymmetricalReady)?;
            }
            if host.is_server() && !ctx.state().symmetric_ready() {
                return Ok(vec![server_symmetric_key(ctx)?]);
            }
            Ok(Vec::new())
        }
        EncryptionMessage::SymmetricKey { key, iv } => {
            if host.is_server() {
                return Err(CryptoError::SymmetricKeyAtServer);
            }
            if !ctx.state().asymmetric_ready() {
                return Err(CryptoError::KeyMaterialBeforeTrust {
                    message: "symmetric",
                });
            }
            ctx.import_symmetric(&key, &iv)?;
            ctx.advance_to(EncryptionState::SymmetricalReady)?;
            let ack = OutboundEncryption::plain(EncryptionMessage::SymmetricKeyAck);
            // The client can speak the symmetric cipher from here on
            ctx.advance_to(EncryptionState::Encrypted)?;
            Ok(vec![ack])
        }
        EncryptionMessage::SymmetricKeyAck => {
            if !ctx.state().symmetric_ready() {
                let message = EncryptionMessage::SymmetricKeyAck;
                return Err(CryptoError::UnexpectedMessage {
                    message: message.name(),
                    state: ctx.state(),
                });
            }
            ctx.advance_to(EncryptionState::Encrypted)?;
            Ok(Vec::new())
        }
    }
}

fn server_symmetric_key(ctx: &mut EncryptionContext) -> Result<OutboundEncryption, CryptoError> {
    let (key, iv) = ctx.generate_symmetric();
    ctx.advance_to(EncryptionState::SymmetricalReady)?;
    Ok(OutboundEncryption::protected(
        EncryptionMessage::SymmetricKey { key, iv },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a full server-initiated handshake, relaying messages between the
    /// two contexts, and assert both ends finish Encrypted.
    #[test]
    fn server_initiated_handshake_completes() {
        let mut server = EncryptionContext::new();
        let mut client = EncryptionContext::new();

        let opening = begin(&mut server).expect("server begins");
        assert_eq!(server.state(), EncryptionState::Handshake);

        let from_client =
            handle_message(&mut client, HostType::Client, opening.message).expect("client handles");
        assert_eq!(client.state(), EncryptionState::AsymmetricalReady);
        assert_eq!(from_client.len(), 1);

        let mut to_client = Vec::new();
        for outbound in from_client {
            to_client.extend(
                handle_message(&mut server, HostType::Server, outbound.message)
                    .expect("server handles"),
            );
        }
        // Server acked the key and pushed its symmetric material
        assert_eq!(server.state(), EncryptionState::SymmetricalReady);
        assert_eq!(to_client.len(), 1);
        assert!(to_client[0].protect);

        let mut to_server = Vec::new();
        for outbound in to_client {
            to_server.extend(
                handle_message(&mut client, HostType::Client, outbound.message)
                    .expect("client handles"),
            );
        }
        assert_eq!(client.state(), EncryptionState::Encrypted);

        for outbound in to_server {
            handle_message(&mut server, HostType::Server, outbound.message)
                .expect("server handles ack");
        }
        assert_eq!(server.state(), EncryptionState::Encrypted);

        // Both ends can now speak the symmetric cipher
        let ciphertext = client.encrypt_symmetric(b"ping").expect("encrypt");
        assert_eq!(server.decrypt_symmetric(&ciphertext).expect("decrypt"), b"ping");
    }

    /// Both sides configured to initiate: the two openings cross on the wire
    /// and each end handles the other's. The exchange must still converge on
    /// a single symmetric key instead of tripping on states already passed.
    #[test]
    fn dual_initiated_handshake_completes() {
        let mut server = EncryptionContext::new();
        let mut client = EncryptionContext::new();

        let server_opening = begin(&mut server).expect("server begins");
        let client_opening = begin(&mut client).expect("client begins");

        let mut from_server = handle_message(&mut server, HostType::Server, client_opening.message)
            .expect("server handles opening");
        let mut from_client = handle_message(&mut client, HostType::Client, server_opening.message)
            .expect("client handles opening");

        // Exactly one symmetric key crosses the wire
        assert_eq!(from_server.iter().filter(|outbound| outbound.protect).count(), 1);

        while !from_server.is_empty() || !from_client.is_empty() {
            let mut next_from_client = Vec::new();
            for outbound in from_server.drain(..) {
                next_from_client.extend(
                    handle_message(&mut client, HostType::Client, outbound.message)
                        .expect("client handles"),
                );
            }
            let mut next_from_server = Vec::new();
            for outbound in from_client.drain(..) {
                assert!(!outbound.protect, "only the server sends key material");
                next_from_server.extend(
                    handle_message(&mut server, HostType::Server, outbound.message)
                        .expect("server handles"),
                );
            }
            from_server = next_from_server;
            from_client = next_from_client;
        }

        assert_eq!(server.state(), EncryptionState::Encrypted);
        assert_eq!(client.state(), EncryptionState::Encrypted);
        let ciphertext = server.encrypt_symmetric(b"pong").expect("encrypt");
        assert_eq!(client.decrypt_symmetric(&ciphertext).expect("decrypt"), b"pong");
    }

    #[test]
    fn symmetric_key_at_server_is_fatal() {
        let mut server = EncryptionContext::new();
        let error = handle_message(
            &mut server,
            HostType::Server,
            EncryptionMessage::SymmetricKey {
                key: vec![0u8; 32],
                iv: vec![0u8; 12],
            },
        )
        .expect_err("must be rejected");
        assert_eq!(error, CryptoError::SymmetricKeyAtServer);
        assert!(error.is_fatal());
    }

    #[test]
    fn symmetric_key_before_trust_is_fatal() {
        let mut client = EncryptionContext::new();
        let error = handle_message(
            &mut client,
            HostType::Client,
            EncryptionMessage::SymmetricKey {
                key: vec![0u8; 32],
                iv: vec![0u8; 12],
            },
        )
        .expect_err("must be rejected");
        assert!(matches!(error, CryptoError::KeyMaterialBeforeTrust { .. }));
        assert!(error.is_fatal());
    }

    #[test]
    fn stray_ack_is_rejected() {
        let mut client = EncryptionContext::new();
        let error = handle_message(
            &mut client,
            HostType::Client,
            EncryptionMessage::SymmetricKeyAck,
        )
        .expect_err("must be rejected");
        assert!(matches!(error, CryptoError::UnexpectedMessage { .. }));
    }
}
