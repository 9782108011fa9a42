use serde::{Deserialize, Serialize};

use crate::rpc::value::ArgValue;

/// Body of a NetworkInvocation packet. The target object rides in the packet
/// header (`target_id`, 0 for the session itself).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkInvocation {
    /// Present for blocking calls: the caller's pending-table slot.
    pub callback_id: Option<u32>,
    pub method: String,
    pub args: Vec<ArgValue>,
    /// When set, the remote side executes but never replies, even on failure.
    pub ignore_result: bool,
}

/// Body of a NetworkInvocationResult packet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkInvocationResult {
    pub callback_id: u32,
    pub outcome: InvocationOutcome,
}

/// Success/value or failure/message. Failures wrap whatever went wrong on
/// the remote side into a structured error instead of crashing the
/// dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InvocationOutcome {
    Success(ArgValue),
    Failure(String),
}

impl InvocationOutcome {
    pub fn into_value(self) -> ArgValue {
        match self {
            InvocationOutcome::Success(value) => value,
            InvocationOutcome::Failure(_) => ArgValue::Null,
        }
    }
}
