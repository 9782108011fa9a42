/// Identifies one logical end of a connection. The server is always session 0;
/// accepted clients are assigned ids starting at 1.
pub type SessionId = i32;

/// Identifies a live replicated object. 0 is reserved and means "unassigned".
pub type NetworkId = i32;

/// Numeric identity of a registered replicable type, established at startup.
pub type TypeTag = u32;

/// Application-assigned id for a Custom packet subtype.
pub type CustomId = i32;

pub const SERVER_SESSION_ID: SessionId = 0;
pub const UNASSIGNED_NETWORK_ID: NetworkId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Server,
    Client,
}

impl HostType {
    pub fn invert(self) -> Self {
        match self {
            HostType::Server => HostType::Client,
            HostType::Client => HostType::Server,
        }
    }

    pub fn is_server(self) -> bool {
        self == HostType::Server
    }
}
