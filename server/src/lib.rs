//! The tether server: accepts connections, assigns session ids, validates
//! hellos, and pumps every session from a bounded worker pool.

pub mod config;
pub mod error;
pub mod events;
mod router;
mod server;
mod worker;

pub use config::ServerConfig;
pub use error::ServerError;
pub use events::{Events, ServerEvent};
pub use server::Server;
