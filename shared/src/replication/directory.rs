use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::{debug, warn};

use crate::{
    id_allocator::IdAllocator,
    registry::TypeRegistry,
    replication::{
        error::ReplicationError,
        manage::{ObjectChange, ObjectManage},
        object::{ObjectMeta, Replicated},
    },
    types::{NetworkId, SessionId, UNASSIGNED_NETWORK_ID},
};

/// The single owner of the live replicated-object set.
///
/// All mutation goes through the spawn/destroy/modify protocol so objects can
/// never self-register twice; a coarse lock protects the set, matching the
/// low-contention access pattern (packet dispatch is per-session serial).
pub struct ObjectDirectory {
    inner: Mutex<Inner>,
}

struct Inner {
    objects: HashMap<NetworkId, Box<dyn Replicated>>,
    ids: IdAllocator,
    // Which peers have confirmed each object live
    confirmed: HashMap<NetworkId, HashSet<SessionId>>,
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDirectory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: HashMap::new(),
                ids: IdAllocator::new(1),
                confirmed: HashMap::new(),
            }),
        }
    }

    /// Register a locally constructed object, assigning a network id if the
    /// object does not carry one, and produce the Create action to announce
    /// it.
    pub fn spawn(
        &self,
        mut object: Box<dyn Replicated>,
    ) -> Result<(NetworkId, ObjectManage), ReplicationError> {
        let mut inner = self.lock();
        let network_id = match object.meta().network_id {
            UNASSIGNED_NETWORK_ID => inner.ids.allocate() as NetworkId,
            requested => {
                if requested < 0 {
                    return Err(ReplicationError::ReservedId {
                        network_id: requested,
                    });
                }
                inner.ids.reserve(requested as u32);
                requested
            }
        };
        object.meta_mut().network_id = network_id;
        let type_tag = object.type_tag();
        let action = ObjectManage::create_for(object.meta(), type_tag, object.extra_data());
        inner.objects.insert(network_id, object);
        debug!("Spawned object {network_id} (type tag {type_tag})");
        Ok((network_id, action))
    }

    /// Apply a received Create action. Returns the reply to send back to the
    /// announcing side.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_create(
        &self,
        registry: &TypeRegistry,
        network_id: NetworkId,
        type_tag: u32,
        owner: SessionId,
        ownership: crate::replication::object::OwnershipMode,
        visibility: crate::replication::object::VisibilityMode,
        active: bool,
        extra: &[u8],
    ) -> Result<ObjectManage, ReplicationError> {
        if network_id == UNASSIGNED_NETWORK_ID {
            return Err(ReplicationError::ReservedId { network_id });
        }
        let mut inner = self.lock();
        if let Some(existing) = inner.objects.get(&network_id) {
            if existing.type_tag() == type_tag {
                debug!("Create for live object {network_id}: replying AlreadyExists");
                return Ok(ObjectManage::AlreadyExists { network_id });
            }
            // Same id, different type: the local object is stale
            warn!(
                "Create for object {network_id} with a different type (stale {}, incoming {type_tag}); destroying the stale object",
                existing.type_tag()
            );
            inner.objects.remove(&network_id);
            inner.confirmed.remove(&network_id);
        }
        let entry = registry
            .entry(type_tag)
            .ok_or(ReplicationError::TypeNotRegistered { tag: type_tag })?;
        let mut object = entry.construct();
        {
            let meta = object.meta_mut();
            meta.network_id = network_id;
            meta.owner = owner;
            meta.ownership = ownership;
            meta.visibility = visibility;
            meta.active = active;
        }
        object.apply_extra_data(extra);
        if network_id > 0 {
            inner.ids.reserve(network_id as u32);
        }
        inner.objects.insert(network_id, object);
        Ok(ObjectManage::ConfirmCreate { network_id })
    }

    /// Apply a received (or local) Destroy, enforcing ownership
    /// authorization before any mutation.
    pub fn handle_destroy(
        &self,
        caller: SessionId,
        caller_is_server: bool,
        network_id: NetworkId,
    ) -> Result<ObjectManage, ReplicationError> {
        let mut inner = self.lock();
        let object = inner
            .objects
            .get(&network_id)
            .ok_or(ReplicationError::ObjectNotFound { network_id })?;
        if !object.meta().authorizes(caller, caller_is_server) {
            return Err(ReplicationError::NotAuthorized { caller, network_id });
        }
        inner.objects.remove(&network_id);
        inner.confirmed.remove(&network_id);
        if network_id > 0 {
            inner.ids.free(network_id as u32);
        }
        debug!("Destroyed object {network_id}");
        Ok(ObjectManage::ConfirmDestroy { network_id })
    }

    /// Apply a received (or local) Modify, enforcing ownership authorization
    /// before any mutation.
    pub fn handle_modify(
        &self,
        caller: SessionId,
        caller_is_server: bool,
        network_id: NetworkId,
        change: &ObjectChange,
    ) -> Result<ObjectManage, ReplicationError> {
        let mut inner = self.lock();
        let object = inner
            .objects
            .get_mut(&network_id)
            .ok_or(ReplicationError::ObjectNotFound { network_id })?;
        if !object.meta().authorizes(caller, caller_is_server) {
            return Err(ReplicationError::NotAuthorized { caller, network_id });
        }
        match change {
            ObjectChange::Owner(owner) => object.meta_mut().owner = *owner,
            ObjectChange::Ownership(ownership) => object.meta_mut().ownership = *ownership,
            ObjectChange::Visibility(visibility) => object.meta_mut().visibility = *visibility,
            ObjectChange::Active(active) => object.meta_mut().active = *active,
            ObjectChange::NetworkId(new_id) => {
                let new_id = *new_id;
                if new_id == UNASSIGNED_NETWORK_ID || inner.objects.contains_key(&new_id) {
                    return Err(ReplicationError::ReservedId { network_id: new_id });
                }
                let mut object = match inner.objects.remove(&network_id) {
                    Some(object) => object,
                    None => return Err(ReplicationError::ObjectNotFound { network_id }),
                };
                object.meta_mut().network_id = new_id;
                if network_id > 0 {
                    inner.ids.free(network_id as u32);
                }
                if new_id > 0 {
                    inner.ids.reserve(new_id as u32);
                }
                let confirmed = inner.confirmed.remove(&network_id);
                if let Some(confirmed) = confirmed {
                    inner.confirmed.insert(new_id, confirmed);
                }
                inner.objects.insert(new_id, object);
                return Ok(ObjectManage::ConfirmModify {
                    network_id: new_id,
                });
            }
        }
        Ok(ObjectManage::ConfirmModify { network_id })
    }

    /// Record that `peer` confirmed the object live.
    pub fn confirm_create(&self, network_id: NetworkId, peer: SessionId) {
        let mut inner = self.lock();
        inner
            .confirmed
            .entry(network_id)
            .or_default()
            .insert(peer);
    }

    /// Whether `peer` has confirmed the object live.
    pub fn is_live_on(&self, network_id: NetworkId, peer: SessionId) -> bool {
        self.lock()
            .confirmed
            .get(&network_id)
            .is_some_and(|peers| peers.contains(&peer))
    }

    /// Drop all confirmation bookkeeping for a departed session.
    pub fn forget_session(&self, peer: SessionId) {
        let mut inner = self.lock();
        for peers in inner.confirmed.values_mut() {
            peers.remove(&peer);
        }
    }

    /// Run `f` against a live object.
    pub fn with_object<R>(
        &self,
        network_id: NetworkId,
        f: impl FnOnce(&mut dyn Replicated) -> R,
    ) -> Option<R> {
        let mut inner = self.lock();
        inner
            .objects
            .get_mut(&network_id)
            .map(|object| f(object.as_mut()))
    }

    pub fn meta(&self, network_id: NetworkId) -> Option<ObjectMeta> {
        self.lock()
            .objects
            .get(&network_id)
            .map(|object| object.meta().clone())
    }

    pub fn type_tag(&self, network_id: NetworkId) -> Option<u32> {
        self.lock()
            .objects
            .get(&network_id)
            .map(|object| object.type_tag())
    }

    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.lock().objects.contains_key(&network_id)
    }

    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.lock().objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
