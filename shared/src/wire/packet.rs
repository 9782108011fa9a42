use serde::{de::DeserializeOwned, Serialize};

use crate::{
    types::{CustomId, NetworkId, SessionId},
    wire::{
        error::{DecodeError, EncodeError},
        flags::PacketFlags,
        header::PacketHeader,
        packet_kind::PacketKind,
    },
};

/// A decoded packet: header plus plaintext body bytes.
///
/// Typed payloads (hello messages, invocations, object manage actions, ...)
/// are bincode-serialized serde values; Custom packet bodies are raw
/// application bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

impl Packet {
    /// A bodyless packet of the given kind, addressed to the session.
    pub fn control(kind: PacketKind) -> Self {
        Self {
            header: PacketHeader::new(kind, PacketFlags::new(), 0),
            body: Vec::new(),
        }
    }

    /// The keepalive packet.
    pub fn keepalive() -> Self {
        Self::control(PacketKind::None)
    }

    /// A session-addressed packet carrying a serialized payload.
    pub fn with_payload<T: Serialize>(kind: PacketKind, payload: &T) -> Result<Self, EncodeError> {
        Self::targeted(kind, 0, payload)
    }

    /// A packet carrying a serialized payload, addressed to a replicated
    /// object (or the session, when `target_id` is 0).
    pub fn targeted<T: Serialize>(
        kind: PacketKind,
        target_id: SessionId,
        payload: &T,
    ) -> Result<Self, EncodeError> {
        let body =
            bincode::serialize(payload).map_err(|err| EncodeError::Payload(err.to_string()))?;
        Ok(Self {
            header: PacketHeader::new(kind, PacketFlags::new(), target_id),
            body,
        })
    }

    /// An application-defined packet with a raw body.
    pub fn custom(custom_id: CustomId, body: Vec<u8>) -> Self {
        let mut header = PacketHeader::new(PacketKind::Custom, PacketFlags::new(), 0);
        header.custom_id = custom_id;
        Self { header, body }
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind
    }

    pub fn target(&self) -> NetworkId {
        self.header.target_id
    }

    /// Deserialize the body as a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        bincode::deserialize(&self.body).map_err(|err| DecodeError::Payload(err.to_string()))
    }

    /// Request compression for this packet's body.
    pub fn compressed(mut self) -> Self {
        self.header.flags = self.header.flags.with(PacketFlags::COMPRESSED);
        self
    }

    /// Route this packet onto the low-latency channel if the transport has
    /// one.
    pub fn priority(mut self) -> Self {
        self.header.flags = self.header.flags.with(PacketFlags::PRIORITY);
        self
    }

    /// Forbid encryption for this packet regardless of session state. Used by
    /// the encryption handshake itself.
    pub fn plaintext(mut self) -> Self {
        self.header.flags = self.header.flags.with(PacketFlags::DO_NOT_ENCRYPT);
        self
    }
}
