use thiserror::Error;

use crate::types::{NetworkId, SessionId, TypeTag};

/// Object directory and sync-var replication errors.
///
/// Authorization failures are surfaced to the call path; none of these may
/// leave the directory in a corrupted state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error("No live object with network id {network_id}")]
    ObjectNotFound { network_id: NetworkId },

    #[error("No type registered for tag {tag}")]
    TypeNotRegistered { tag: TypeTag },

    /// SECURITY: a non-owning, non-server caller attempted a mutation on an
    /// object that does not allow public modification.
    #[error("Session {caller} is not authorized to modify object {network_id}")]
    NotAuthorized {
        caller: SessionId,
        network_id: NetworkId,
    },

    #[error("Object {network_id} has no replicated field named '{field}'")]
    UnknownField {
        network_id: NetworkId,
        field: String,
    },

    #[error("Replicated field '{field}' rejected value: {reason}")]
    BadFieldValue { field: String, reason: String },

    #[error("Sync var write to '{field}' on object {network_id} denied for session {caller}")]
    WriteDenied {
        network_id: NetworkId,
        field: String,
        caller: SessionId,
    },

    #[error("Network id {network_id} is reserved")]
    ReservedId { network_id: NetworkId },
}
