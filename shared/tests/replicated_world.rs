//! The object lifecycle and sync-var convergence across two directories,
//! with actions carried through their wire serialization.

use std::sync::Arc;

use tether_shared::{
    ArgKind, ArgValue, InvocableDescriptor, InvocationContext, InvokeDirection, ObjectDirectory,
    ObjectManage, ObjectMeta, OwnershipMode, Replicated, ReplicatedType, ReplicationError,
    RpcError, SyncVarDescriptor, SyncVarReplicator, TypeRegistry, TypeTag, VisibilityMode,
    WriteDirection, SERVER_SESSION_ID,
};

#[derive(Default)]
struct Avatar {
    meta: ObjectMeta,
    x: f32,
    y: f32,
}

impl Replicated for Avatar {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
    fn type_tag(&self) -> TypeTag {
        Self::TYPE_TAG
    }
    fn sync_var_get(&self, field: &str) -> Option<ArgValue> {
        match field {
            "x" => Some(ArgValue::F32(self.x)),
            "y" => Some(ArgValue::F32(self.y)),
            _ => None,
        }
    }
    fn sync_var_set(&mut self, field: &str, value: &ArgValue) -> Result<(), ReplicationError> {
        let value = value
            .as_f32()
            .ok_or_else(|| ReplicationError::BadFieldValue {
                field: field.to_string(),
                reason: "expected f32".to_string(),
            })?;
        match field {
            "x" => self.x = value,
            "y" => self.y = value,
            _ => {
                return Err(ReplicationError::UnknownField {
                    network_id: self.meta.network_id,
                    field: field.to_string(),
                })
            }
        }
        Ok(())
    }
}

fn move_handler(
    object: &mut dyn Replicated,
    _context: &InvocationContext,
    args: &[ArgValue],
) -> Result<ArgValue, RpcError> {
    object
        .sync_var_set("x", &args[0])
        .and_then(|_| object.sync_var_set("y", &args[1]))
        .map_err(|err| RpcError::HandlerFailed(err.to_string()))?;
    Ok(ArgValue::Null)
}

const AVATAR_INVOCABLES: &[InvocableDescriptor] = &[InvocableDescriptor {
    name: "move",
    direction: InvokeDirection::Either,
    secure: true,
    params: &[ArgKind::F32, ArgKind::F32],
    required: 2,
    handler: move_handler,
}];

const AVATAR_SYNC_VARS: &[SyncVarDescriptor] = &[
    SyncVarDescriptor {
        name: "x",
        direction: WriteDirection::Server,
    },
    SyncVarDescriptor {
        name: "y",
        direction: WriteDirection::Server,
    },
];

impl ReplicatedType for Avatar {
    const TYPE_TAG: TypeTag = 7;
    const TYPE_NAME: &'static str = "Avatar";
    fn list_invocables() -> &'static [InvocableDescriptor] {
        AVATAR_INVOCABLES
    }
    fn list_sync_vars() -> &'static [SyncVarDescriptor] {
        AVATAR_SYNC_VARS
    }
}

fn registry() -> Arc<TypeRegistry> {
    let registry = Arc::new(TypeRegistry::new());
    registry.register::<Avatar>().expect("register");
    registry
}

fn client_owned_avatar(owner: i32) -> Box<dyn Replicated> {
    Box::new(Avatar {
        meta: ObjectMeta {
            owner,
            ownership: OwnershipMode::Client,
            visibility: VisibilityMode::Everyone,
            ..ObjectMeta::default()
        },
        ..Avatar::default()
    })
}

/// Serialize and deserialize an action the way it crosses the wire.
fn over_the_wire(action: &ObjectManage) -> ObjectManage {
    let bytes = bincode::serialize(action).expect("serialize");
    bincode::deserialize(&bytes).expect("deserialize")
}

#[test]
fn spawn_replicates_to_a_second_directory() {
    let registry = registry();
    let server = ObjectDirectory::new();
    let client = ObjectDirectory::new();

    let (network_id, action) = server.spawn(client_owned_avatar(1)).expect("spawn");
    assert_eq!(network_id, 1);

    let ObjectManage::Create {
        network_id: id,
        type_tag,
        owner,
        ownership,
        visibility,
        active,
        extra,
    } = over_the_wire(&action)
    else {
        panic!("spawn must yield a Create action");
    };
    let reply = client
        .handle_create(
            &registry, id, type_tag, owner, ownership, visibility, active, &extra,
        )
        .expect("create");
    assert_eq!(reply, ObjectManage::ConfirmCreate { network_id });
    assert!(client.contains(network_id));
    let meta = client.meta(network_id).expect("meta");
    assert_eq!(meta.owner, 1);
    assert_eq!(meta.ownership, OwnershipMode::Client);

    server.confirm_create(network_id, 1);
    assert!(server.is_live_on(network_id, 1));
    assert!(!server.is_live_on(network_id, 2));
}

#[test]
fn duplicate_create_reports_already_exists() {
    let registry = registry();
    let server = ObjectDirectory::new();
    let client = ObjectDirectory::new();

    let (network_id, action) = server.spawn(client_owned_avatar(1)).expect("spawn");
    for expected_last in [
        ObjectManage::ConfirmCreate { network_id },
        ObjectManage::AlreadyExists { network_id },
    ] {
        let ObjectManage::Create {
            network_id: id,
            type_tag,
            owner,
            ownership,
            visibility,
            active,
            extra,
        } = over_the_wire(&action)
        else {
            panic!("expected Create");
        };
        let reply = client
            .handle_create(
                &registry, id, type_tag, owner, ownership, visibility, active, &extra,
            )
            .expect("create");
        assert_eq!(reply, expected_last);
    }
    assert_eq!(client.len(), 1);
}

#[test]
fn destroy_requires_ownership() {
    let server = ObjectDirectory::new();
    let (network_id, _) = server.spawn(client_owned_avatar(1)).expect("spawn");

    // Session 2 does not own the avatar
    let denied = server
        .handle_destroy(2, false, network_id)
        .expect_err("must be denied");
    assert!(matches!(denied, ReplicationError::NotAuthorized { caller: 2, .. }));
    assert!(server.contains(network_id));

    // The owner may destroy it
    let reply = server.handle_destroy(1, false, network_id).expect("destroy");
    assert_eq!(reply, ObjectManage::ConfirmDestroy { network_id });
    assert!(!server.contains(network_id));
}

#[test]
fn sync_vars_converge_and_diffs_skip_unchanged_fields() {
    let registry = registry();
    let server = ObjectDirectory::new();
    let client = ObjectDirectory::new();
    let server_replicator = SyncVarReplicator::new();
    let client_replicator = SyncVarReplicator::new();

    let (network_id, action) = server.spawn(client_owned_avatar(1)).expect("spawn");
    let ObjectManage::Create {
        network_id: id,
        type_tag,
        owner,
        ownership,
        visibility,
        active,
        extra,
    } = action
    else {
        panic!("expected Create");
    };
    client
        .handle_create(
            &registry, id, type_tag, owner, ownership, visibility, active, &extra,
        )
        .expect("create");

    // First diff announces the initial values
    let initial = server_replicator.collect_updates(&server, &registry);
    assert_eq!(initial.entries.len(), 2);
    client_replicator.apply(&client, &registry, SERVER_SESSION_ID, true, initial);

    // No changes: nothing to send
    assert!(server_replicator
        .collect_updates(&server, &registry)
        .entries
        .is_empty());

    // Change one field and the diff carries exactly that field
    server
        .with_object(network_id, |object| {
            object.sync_var_set("x", &ArgValue::F32(4.5))
        })
        .expect("object")
        .expect("set");
    let update = server_replicator.collect_updates(&server, &registry);
    assert_eq!(update.entries.len(), 1);
    assert_eq!(update.entries[0].field, "x");

    let report = client_replicator.apply(&client, &registry, SERVER_SESSION_ID, true, update);
    assert_eq!(report.applied.len(), 1);
    assert!(report.denied.is_empty());
    let x = client
        .with_object(network_id, |object| object.sync_var_get("x"))
        .expect("object");
    assert_eq!(x, Some(ArgValue::F32(4.5)));
}

#[test]
fn server_directed_fields_reject_client_writes() {
    let registry = registry();
    let directory = ObjectDirectory::new();
    let replicator = SyncVarReplicator::new();
    let (network_id, _) = directory.spawn(client_owned_avatar(1)).expect("spawn");

    let update = tether_shared::SyncVarUpdate {
        entries: vec![tether_shared::SyncVarEntry {
            network_id,
            field: "x".to_string(),
            value: ArgValue::F32(99.0),
            // The sender's claimed direction is not trusted
            direction: WriteDirection::Public,
        }],
    };
    let report = replicator.apply(&directory, &registry, 1, false, update);
    assert!(report.applied.is_empty());
    assert_eq!(report.denied.len(), 1);
    let x = directory
        .with_object(network_id, |object| object.sync_var_get("x"))
        .expect("object");
    assert_eq!(x, Some(ArgValue::F32(0.0)));
}
