use thiserror::Error;

use crate::types::{NetworkId, SessionId};

/// RPC resolution, authorization, and execution errors.
///
/// For request/response calls these are converted into a structured Failure
/// result returned to the caller; for fire-and-forget calls they are logged
/// locally. Never silently swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("No invocable method named '{method}' matches the supplied argument types")]
    MethodNotFound { method: String },

    #[error("{count} candidates for method '{method}' match the supplied argument types equally")]
    AmbiguousMatch { method: String, count: usize },

    #[error("Method '{method}' may only be invoked from the {required} side")]
    WrongDirection {
        method: String,
        required: &'static str,
    },

    /// SECURITY: a secure method was called by a session that neither owns
    /// the target nor is the server, and the target does not allow public
    /// modification.
    #[error("Session {caller} is not authorized to invoke secure method '{method}' on object {target}")]
    OwnershipViolation {
        method: String,
        caller: SessionId,
        target: NetworkId,
    },

    #[error("No live object with network id {target}")]
    TargetNotFound { target: NetworkId },

    #[error("No type registered for tag {tag}")]
    TypeNotRegistered { tag: u32 },

    #[error("Remote handler failed: {0}")]
    HandlerFailed(String),

    #[error("Failed to serialize invocation payload: {0}")]
    Serialization(String),
}
