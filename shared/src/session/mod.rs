pub mod config;
pub mod connection_state;
pub mod dispatch;
pub mod error;
#[allow(clippy::module_inception)]
pub mod session;

pub use config::{ConnectionConfig, EncryptionMode};
pub use connection_state::ConnectionState;
pub use dispatch::{dispatch, SessionContext, SessionEvent};
pub use error::SessionError;
pub use session::{encryption_packet, Session};
