pub mod dispatcher;
pub mod error;
pub mod invocation;
pub mod pending;
pub mod value;

pub use dispatcher::{authorize, dispatch_invocation, execute, resolve};
pub use error::RpcError;
pub use invocation::{InvocationOutcome, NetworkInvocation, NetworkInvocationResult};
pub use pending::PendingInvocations;
pub use value::{ArgKind, ArgValue};
