//! The tether client: one session to a server, with automatic or manual
//! pumping and the invoke/spawn/sync APIs.

mod client;
pub mod config;
pub mod error;

pub use client::{Client, ClientEvent};
pub use config::ClientConfig;
pub use error::ClientError;
