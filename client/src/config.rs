use std::time::Duration;

use tether_shared::ConnectionConfig;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Protocol identity sent in the ClientHello; must match the server's.
    pub protocol: String,
    pub version: String,
    /// Open a datagram channel for Priority packets next to the TCP stream.
    pub enable_udp: bool,
    /// Pump the session from a background thread. When false the application
    /// must call `Client::pump()` itself.
    pub auto_pump: bool,
    /// How long `connect` waits for the ServerHello.
    pub connect_timeout: Duration,
    /// How often local sync-var changes are diffed and pushed.
    pub sync_interval: Duration,
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: "tether".to_string(),
            version: "0.1.0".to_string(),
            enable_udp: true,
            auto_pump: true,
            connect_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_millis(50),
            connection: ConnectionConfig::default(),
        }
    }
}
