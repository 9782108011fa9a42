use serde::{Deserialize, Serialize};

use crate::{
    registry::{InvocableDescriptor, ListenerDescriptor, SyncVarDescriptor},
    replication::error::ReplicationError,
    rpc::value::ArgValue,
    types::{NetworkId, SessionId, TypeTag, SERVER_SESSION_ID, UNASSIGNED_NETWORK_ID},
};

/// Who may author changes to a replicated object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipMode {
    /// The owning client session authors changes.
    Client,
    /// Only the server authors changes.
    Server,
    /// Anyone may modify.
    Public,
}

/// Which sessions receive updates about an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityMode {
    /// Never announced to any client.
    ServerOnly,
    /// Announced only to the owning session.
    OwnerAndServer,
    /// Announced to every session.
    Everyone,
}

/// The replication bookkeeping every replicated object carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Unique among live objects; 0 means unassigned.
    pub network_id: NetworkId,
    pub owner: SessionId,
    pub ownership: OwnershipMode,
    pub visibility: VisibilityMode,
    pub active: bool,
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self {
            network_id: UNASSIGNED_NETWORK_ID,
            owner: SERVER_SESSION_ID,
            ownership: OwnershipMode::Server,
            visibility: VisibilityMode::Everyone,
            active: true,
        }
    }
}

impl ObjectMeta {
    /// Whether `caller` may author changes to this object (used by secure
    /// RPCs and by the Modify/Destroy protocol).
    pub fn authorizes(&self, caller: SessionId, caller_is_server: bool) -> bool {
        match self.ownership {
            OwnershipMode::Client => caller == self.owner,
            OwnershipMode::Server => caller_is_server,
            OwnershipMode::Public => true,
        }
    }

    /// The sessions (out of `sessions`) that should hear about this object.
    /// The origin of an update is excluded by the caller, not here.
    pub fn visible_to(&self, session: SessionId) -> bool {
        match self.visibility {
            VisibilityMode::ServerOnly => false,
            VisibilityMode::OwnerAndServer => session == self.owner,
            VisibilityMode::Everyone => true,
        }
    }
}

/// The replicable-object capability: anything whose existence and fields are
/// kept consistent across sessions.
///
/// Field access is by name so the sync-var replicator can apply wire updates
/// without knowing concrete types; the descriptor tables live on
/// [`ReplicatedType`] and are captured by the type registry at startup.
pub trait Replicated: Send {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn type_tag(&self) -> TypeTag;

    /// Read a replicated field by name.
    fn sync_var_get(&self, field: &str) -> Option<ArgValue>;

    /// Write a replicated field by name. Direction authorization happens in
    /// the replicator, not here.
    fn sync_var_set(&mut self, field: &str, value: &ArgValue) -> Result<(), ReplicationError>;

    /// Type-specific payload carried inside Create actions.
    fn extra_data(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Apply a received Create action's type-specific payload.
    fn apply_extra_data(&mut self, _extra: &[u8]) {}

    /// Called once per applied sync-var batch.
    fn on_sync_vars_applied(&mut self) {}
}

/// Static registration surface for a replicable type: a stable numeric tag, a
/// constructor path, and the descriptor tables the registry caches.
pub trait ReplicatedType: Replicated + Default + 'static {
    const TYPE_TAG: TypeTag;
    const TYPE_NAME: &'static str;

    fn list_invocables() -> &'static [InvocableDescriptor] {
        &[]
    }

    fn list_listeners() -> &'static [ListenerDescriptor] {
        &[]
    }

    fn list_sync_vars() -> &'static [SyncVarDescriptor] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ownership_authorizes_owner_only() {
        let meta = ObjectMeta {
            owner: 3,
            ownership: OwnershipMode::Client,
            ..ObjectMeta::default()
        };
        assert!(meta.authorizes(3, false));
        assert!(!meta.authorizes(4, false));
        assert!(!meta.authorizes(SERVER_SESSION_ID, true));
    }

    #[test]
    fn server_ownership_authorizes_server_only() {
        let meta = ObjectMeta {
            ownership: OwnershipMode::Server,
            ..ObjectMeta::default()
        };
        assert!(meta.authorizes(SERVER_SESSION_ID, true));
        assert!(!meta.authorizes(5, false));
    }

    #[test]
    fn public_ownership_authorizes_everyone() {
        let meta = ObjectMeta {
            ownership: OwnershipMode::Public,
            ..ObjectMeta::default()
        };
        assert!(meta.authorizes(9, false));
    }

    #[test]
    fn visibility_filters_sessions() {
        let meta = ObjectMeta {
            owner: 2,
            visibility: VisibilityMode::OwnerAndServer,
            ..ObjectMeta::default()
        };
        assert!(meta.visible_to(2));
        assert!(!meta.visible_to(3));

        let hidden = ObjectMeta {
            visibility: VisibilityMode::ServerOnly,
            ..ObjectMeta::default()
        };
        assert!(!hidden.visible_to(2));
    }
}
