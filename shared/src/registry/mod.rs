//! The per-application-type cache of invocable methods, custom-packet
//! listeners, and replicated-field descriptors.
//!
//! Types register once at startup through [`ReplicatedType`]'s descriptor
//! tables; lookups at packet-handling time are by stable numeric tag, never
//! by free-text type name. The registry is a pure cache: entries are only
//! ever inserted, never mutated.

pub mod error;

pub use error::RegistryError;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    replication::object::{Replicated, ReplicatedType},
    replication::sync_var::WriteDirection,
    rpc::{error::RpcError, value::ArgKind, value::ArgValue},
    types::{CustomId, TypeTag},
    wire::packet::Packet,
};

/// Which side may originate calls to an invocable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeDirection {
    ServerOnly,
    ClientOnly,
    Either,
}

/// Context handed to every invocable and listener handler. Stands in for the
/// implicit session-handle parameter of the wire protocol; it is supplied by
/// the runtime and never counted against user-supplied arguments.
#[derive(Clone, Copy, Debug)]
pub struct InvocationContext {
    /// The session the call came from (the local session id for local calls).
    pub caller: crate::types::SessionId,
    pub caller_is_server: bool,
}

pub type ConstructorFn = fn() -> Box<dyn Replicated>;
pub type InvocableFn =
    fn(&mut dyn Replicated, &InvocationContext, &[ArgValue]) -> Result<ArgValue, RpcError>;
pub type ListenerFn = fn(&mut dyn Replicated, &InvocationContext, &Packet);

/// One remotely invocable method.
#[derive(Debug)]
pub struct InvocableDescriptor {
    pub name: &'static str,
    pub direction: InvokeDirection,
    /// Secure methods additionally require ownership authorization.
    pub secure: bool,
    /// User-supplied parameter kinds, excluding the implicit context.
    pub params: &'static [ArgKind],
    /// Parameters past this index may be defaulted when unmatched.
    pub required: usize,
    pub handler: InvocableFn,
}

/// One custom-packet listener method.
pub struct ListenerDescriptor {
    pub custom_id: CustomId,
    pub handler: ListenerFn,
}

/// One replicated field.
pub struct SyncVarDescriptor {
    pub name: &'static str,
    pub direction: WriteDirection,
}

/// Everything the engine knows about one registered type.
pub struct TypeEntry {
    pub tag: TypeTag,
    pub type_name: &'static str,
    pub constructor: ConstructorFn,
    pub invocables: &'static [InvocableDescriptor],
    pub listeners: &'static [ListenerDescriptor],
    pub sync_vars: &'static [SyncVarDescriptor],
}

impl TypeEntry {
    pub fn construct(&self) -> Box<dyn Replicated> {
        (self.constructor)()
    }

    pub fn sync_var(&self, field: &str) -> Option<&SyncVarDescriptor> {
        self.sync_vars.iter().find(|desc| desc.name == field)
    }

    pub fn listeners_for(&self, custom_id: CustomId) -> impl Iterator<Item = &ListenerDescriptor> {
        self.listeners
            .iter()
            .filter(move |desc| desc.custom_id == custom_id)
    }
}

/// Registry of replicable types and custom packet names, shared by every
/// session in a process.
#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<TypeTag, Arc<TypeEntry>>>,
    custom_names: RwLock<HashMap<CustomId, String>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replicable type. Duplicate tags are an error: the cache is
    /// insert-once.
    pub fn register<T: ReplicatedType>(&self) -> Result<(), RegistryError> {
        let mut entries = self.write_entries();
        if let Some(existing) = entries.get(&T::TYPE_TAG) {
            return Err(RegistryError::DuplicateTag {
                tag: T::TYPE_TAG,
                existing: existing.type_name,
                new: T::TYPE_NAME,
            });
        }
        entries.insert(
            T::TYPE_TAG,
            Arc::new(TypeEntry {
                tag: T::TYPE_TAG,
                type_name: T::TYPE_NAME,
                constructor: || Box::new(T::default()),
                invocables: T::list_invocables(),
                listeners: T::list_listeners(),
                sync_vars: T::list_sync_vars(),
            }),
        );
        Ok(())
    }

    pub fn entry(&self, tag: TypeTag) -> Option<Arc<TypeEntry>> {
        self.read_entries().get(&tag).cloned()
    }

    /// Register an application-defined custom packet subtype.
    pub fn register_custom(&self, custom_id: CustomId, name: &str) -> Result<(), RegistryError> {
        let mut names = self
            .custom_names
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if names.contains_key(&custom_id) {
            return Err(RegistryError::DuplicateCustomId { custom_id });
        }
        names.insert(custom_id, name.to_string());
        Ok(())
    }

    pub fn custom_name(&self, custom_id: CustomId) -> Option<String> {
        self.custom_names
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&custom_id)
            .cloned()
    }

    /// The id → name map advertised inside ServerHello.
    pub fn custom_packet_map(&self) -> HashMap<CustomId, String> {
        self.custom_names
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn read_entries(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<TypeTag, Arc<TypeEntry>>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<TypeTag, Arc<TypeEntry>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
