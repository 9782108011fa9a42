pub mod context;
pub mod error;
pub mod handshake;
pub mod state;

pub use context::EncryptionContext;
pub use handshake::{EncryptionMessage, OutboundEncryption};
pub use state::EncryptionState;
