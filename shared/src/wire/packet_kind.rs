// An enum representing the different kinds of packets that can be
// sent/received. The discriminants are the on-wire byte values and are fixed
// protocol surface, so they are written out explicitly.

use crate::wire::error::PacketKindError;

#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    // Carries no payload; doubles as the keepalive
    None = 0,
    // Marks a session ready / not ready for application traffic
    ReadyStateUpdate = 1,
    // Announces a connection state change, carrying a reason on disconnect
    ConnectionStateUpdate = 2,
    // First packet a client sends: protocol id + version
    ClientHello = 3,
    // Server reply: assigned session id, custom packet map, ssl capability
    ServerHello = 4,
    // A remote method invocation request
    NetworkInvocation = 5,
    // The success/failure result of a NetworkInvocation
    NetworkInvocationResult = 6,
    // Encryption handshake key material and acknowledgements
    Encryption = 7,
    // A batch of replicated field updates
    SyncVarUpdate = 8,
    // Replicated object lifecycle: create/destroy/modify + confirmations
    ObjectManage = 9,
    // Chunked byte stream transfer
    Stream = 10,
    // Application-defined packet, subtype in the header's custom id
    Custom = 11,
}

impl PacketKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self, PacketKindError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::ReadyStateUpdate),
            2 => Ok(Self::ConnectionStateUpdate),
            3 => Ok(Self::ClientHello),
            4 => Ok(Self::ServerHello),
            5 => Ok(Self::NetworkInvocation),
            6 => Ok(Self::NetworkInvocationResult),
            7 => Ok(Self::Encryption),
            8 => Ok(Self::SyncVarUpdate),
            9 => Ok(Self::ObjectManage),
            10 => Ok(Self::Stream),
            11 => Ok(Self::Custom),
            // Malformed or malicious packets may carry any byte here; this
            // must be an error, never a panic
            _ => Err(PacketKindError::InvalidKind { value }),
        }
    }
}
