pub mod codec;
pub mod error;
pub mod flags;
pub mod header;
pub mod packet;
pub mod packet_kind;
