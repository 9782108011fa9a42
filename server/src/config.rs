use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use tether_shared::ConnectionConfig;

/// Everything the server coordinator needs to know up front.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Protocol identity a ClientHello must match.
    pub protocol: String,
    pub version: String,
    /// Connections over this count are refused with a reason.
    pub max_sessions: usize,
    /// Fixed worker thread count; independent of how many clients connect.
    pub workers: usize,
    /// Mark sessions Ready as soon as the hello completes.
    pub default_ready: bool,
    /// Advertised in the ServerHello. Capability flag only.
    pub ssl: bool,
    /// Offer a datagram channel for Priority packets.
    pub enable_udp: bool,
    /// How often the sync-var replicator diffs and broadcasts.
    pub sync_interval: Duration,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 7777,
            protocol: "tether".to_string(),
            version: "0.1.0".to_string(),
            max_sessions: 64,
            workers: 4,
            default_ready: true,
            ssl: false,
            enable_udp: true,
            sync_interval: Duration::from_millis(50),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
