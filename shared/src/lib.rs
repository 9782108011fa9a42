//! Core protocol shared by the tether server and client: packet framing with
//! layered compression and encryption, the key-exchange state machine, the
//! type registry, RPC dispatch with ownership authorization, and replicated
//! objects with per-field sync vars.

pub mod constants;
pub mod crypto;
pub mod handshake;
pub mod id_allocator;
pub mod registry;
pub mod replication;
pub mod rpc;
pub mod session;
pub mod stream;
pub mod timer;
pub mod transport;
pub mod types;
pub mod wire;

pub use crypto::{EncryptionContext, EncryptionMessage, EncryptionState};
pub use handshake::{
    ClientHello, ConnectionStateUpdate, HandshakeError, ReadyStateUpdate, ServerHello,
};
pub use id_allocator::IdAllocator;
pub use registry::{
    InvocableDescriptor, InvocationContext, InvokeDirection, ListenerDescriptor, RegistryError,
    SyncVarDescriptor, TypeRegistry,
};
pub use replication::{
    directory::ObjectDirectory,
    error::ReplicationError,
    manage::{ObjectChange, ObjectManage},
    object::{ObjectMeta, OwnershipMode, Replicated, ReplicatedType, VisibilityMode},
    sync_var::{SyncVarEntry, SyncVarReplicator, SyncVarReport, SyncVarUpdate, WriteDirection},
};
pub use rpc::{
    ArgKind, ArgValue, InvocationOutcome, NetworkInvocation, NetworkInvocationResult,
    PendingInvocations, RpcError,
};
pub use session::{
    dispatch, ConnectionConfig, ConnectionState, EncryptionMode, Session, SessionContext,
    SessionError, SessionEvent,
};
pub use stream::{chunk_stream, StreamAssembler, StreamError, StreamMessage};
pub use timer::Timer;
pub use transport::{HybridTransport, TcpTransport, Transport, TransportError, UdpTransport};
pub use types::{
    CustomId, HostType, NetworkId, SessionId, TypeTag, SERVER_SESSION_ID, UNASSIGNED_NETWORK_ID,
};
pub use wire::{
    codec::{decode, encode, CodecConfig},
    error::{DecodeError, EncodeError},
    flags::PacketFlags,
    header::PacketHeader,
    packet::Packet,
    packet_kind::PacketKind,
};
