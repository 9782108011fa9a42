use std::time::Duration;

/// Fixed ceiling on the encoded size of a single packet, enforced on both the
/// encode and decode paths to bound memory use.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

/// How long a connecting session may sit in the Handshake state before it is
/// disconnected with a timeout reason.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the encryption handshake may take to reach AsymmetricalReady
/// before the watchdog disconnects the session.
pub const DEFAULT_ENCRYPTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle interval after which a keepalive (PacketKind::None) is sent.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Size in bytes of the fixed packet header on the wire.
pub const PACKET_HEADER_SIZE: usize = 14;

/// zstd compression level used for bodies flagged Compressed.
pub const COMPRESSION_LEVEL: i32 = 3;
