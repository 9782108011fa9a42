use std::{collections::HashMap, sync::Mutex};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    registry::TypeRegistry,
    replication::{directory::ObjectDirectory, error::ReplicationError},
    rpc::value::ArgValue,
    types::{NetworkId, SessionId},
};

/// Who may originate changes to a replicated field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteDirection {
    /// Only the server writes.
    Server,
    /// Only the owning client writes.
    OwningClient,
    /// Anyone writes.
    Public,
}

impl WriteDirection {
    pub fn permits(self, sender: SessionId, sender_is_server: bool, owner: SessionId) -> bool {
        match self {
            WriteDirection::Server => sender_is_server,
            WriteDirection::OwningClient => sender == owner,
            WriteDirection::Public => true,
        }
    }
}

/// One replicated field write on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncVarEntry {
    pub network_id: NetworkId,
    pub field: String,
    pub value: ArgValue,
    pub direction: WriteDirection,
}

/// Body of a SyncVarUpdate packet: a batch of field writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncVarUpdate {
    pub entries: Vec<SyncVarEntry>,
}

/// The result of applying a received batch.
#[derive(Debug, Default)]
pub struct SyncVarReport {
    /// Entries that passed direction checks and were written. On the server
    /// these are the relay candidates.
    pub applied: Vec<SyncVarEntry>,
    /// Entries refused by authorization or lookup, with the reason.
    pub denied: Vec<(SyncVarEntry, ReplicationError)>,
}

/// Per-field value propagation with direction-based write authorization.
///
/// Outbound, values are diffed against the last serialized value so unchanged
/// fields cost no traffic. Inbound, each entry is checked against the field's
/// registered write direction (the registry's descriptor is authoritative,
/// not the direction claimed on the wire) before it is written.
pub struct SyncVarReplicator {
    last_sent: Mutex<HashMap<(NetworkId, String), ArgValue>>,
}

impl Default for SyncVarReplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncVarReplicator {
    pub fn new() -> Self {
        Self {
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Diff every registered sync var of every live object against the last
    /// collected value, returning the batch to send (empty = nothing to do).
    pub fn collect_updates(
        &self,
        directory: &ObjectDirectory,
        registry: &TypeRegistry,
    ) -> SyncVarUpdate {
        let mut entries = Vec::new();
        let mut last_sent = self.lock();
        for network_id in directory.network_ids() {
            let Some(tag) = directory.type_tag(network_id) else {
                continue;
            };
            let Some(entry) = registry.entry(tag) else {
                continue;
            };
            for descriptor in entry.sync_vars {
                let value = directory
                    .with_object(network_id, |object| object.sync_var_get(descriptor.name));
                let Some(Some(value)) = value else {
                    continue;
                };
                let key = (network_id, descriptor.name.to_string());
                if last_sent.get(&key) == Some(&value) {
                    continue;
                }
                last_sent.insert(key, value.clone());
                entries.push(SyncVarEntry {
                    network_id,
                    field: descriptor.name.to_string(),
                    value,
                    direction: descriptor.direction,
                });
            }
        }
        SyncVarUpdate { entries }
    }

    /// Apply a received batch. Each entry is independently authorized; the
    /// owning object is notified once per batch regardless of how many of its
    /// fields changed.
    pub fn apply(
        &self,
        directory: &ObjectDirectory,
        registry: &TypeRegistry,
        sender: SessionId,
        sender_is_server: bool,
        update: SyncVarUpdate,
    ) -> SyncVarReport {
        let mut report = SyncVarReport::default();
        let mut touched: Vec<NetworkId> = Vec::new();

        for entry in update.entries {
            match self.apply_entry(directory, registry, sender, sender_is_server, &entry) {
                Ok(()) => {
                    if !touched.contains(&entry.network_id) {
                        touched.push(entry.network_id);
                    }
                    // Remember the applied value so we don't echo it back out
                    self.lock().insert(
                        (entry.network_id, entry.field.clone()),
                        entry.value.clone(),
                    );
                    report.applied.push(entry);
                }
                Err(error) => {
                    warn!(
                        "Denied sync var write to '{}' on object {} from session {sender}: {error}",
                        entry.field, entry.network_id
                    );
                    report.denied.push((entry, error));
                }
            }
        }

        for network_id in touched {
            directory.with_object(network_id, |object| object.on_sync_vars_applied());
        }
        report
    }

    fn apply_entry(
        &self,
        directory: &ObjectDirectory,
        registry: &TypeRegistry,
        sender: SessionId,
        sender_is_server: bool,
        entry: &SyncVarEntry,
    ) -> Result<(), ReplicationError> {
        let meta = directory
            .meta(entry.network_id)
            .ok_or(ReplicationError::ObjectNotFound {
                network_id: entry.network_id,
            })?;
        let tag = directory
            .type_tag(entry.network_id)
            .ok_or(ReplicationError::ObjectNotFound {
                network_id: entry.network_id,
            })?;
        let type_entry =
            registry
                .entry(tag)
                .ok_or(ReplicationError::TypeNotRegistered { tag })?;
        let descriptor =
            type_entry
                .sync_var(&entry.field)
                .ok_or_else(|| ReplicationError::UnknownField {
                    network_id: entry.network_id,
                    field: entry.field.clone(),
                })?;
        if !descriptor
            .direction
            .permits(sender, sender_is_server, meta.owner)
        {
            return Err(ReplicationError::WriteDenied {
                network_id: entry.network_id,
                field: entry.field.clone(),
                caller: sender,
            });
        }
        directory
            .with_object(entry.network_id, |object| {
                object.sync_var_set(&entry.field, &entry.value)
            })
            .ok_or(ReplicationError::ObjectNotFound {
                network_id: entry.network_id,
            })?
    }

    /// Drop diff state for a destroyed object.
    pub fn forget_object(&self, network_id: NetworkId) {
        self.lock().retain(|(id, _), _| *id != network_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(NetworkId, String), ArgValue>> {
        self.last_sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
