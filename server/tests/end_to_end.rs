//! A real server and real clients over loopback TCP/UDP: connect handshake,
//! refusal, ownership-gated invocations, and sync-var convergence.

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::{Duration, Instant},
};

use tether_server::{Server, ServerConfig, ServerEvent};
use tether_client::{Client, ClientConfig, ClientError};
use tether_shared::{
    ArgKind, ArgValue, InvocableDescriptor, InvocationContext, InvokeDirection, ObjectMeta,
    OwnershipMode, Replicated, ReplicatedType, ReplicationError, RpcError, SyncVarDescriptor,
    TypeRegistry, TypeTag, VisibilityMode, WriteDirection,
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
    Ok(ArgValue::Bool(true))
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
    const TYPE_TAG: TypeTag = 11;
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

fn server_config() -> ServerConfig {
    ServerConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        protocol: "game".to_string(),
        version: "1.0".to_string(),
        workers: 2,
        sync_interval: Duration::from_millis(25),
        ..ServerConfig::default()
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        protocol: "game".to_string(),
        version: "1.0".to_string(),
        connect_timeout: Duration::from_secs(5),
        sync_interval: Duration::from_millis(25),
        ..ClientConfig::default()
    }
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Drain server events into `sink` and report whether any satisfies `pred`.
fn saw_event(
    server: &Server,
    sink: &mut Vec<ServerEvent>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> bool {
    sink.extend(server.receive());
    sink.iter().any(pred)
}

fn read_f32(client: &Client, network_id: i32, field: &str) -> Option<f32> {
    client
        .context()
        .directory
        .with_object(network_id, |object| object.sync_var_get(field))
        .flatten()
        .and_then(|value| value.as_f32())
}

#[test]
fn client_connects_and_binds_the_datagram_channel() {
    let server = Server::listen(server_config(), registry()).expect("listen");
    let client = Client::connect(server.local_addr(), client_config(), registry())
        .expect("connect");

    assert_eq!(client.session_id(), 1);
    assert!(client.is_connected());

    let mut events = Vec::new();
    assert!(wait_until(
        || saw_event(&server, &mut events, |event| matches!(
            event,
            ServerEvent::Connected(1)
        )),
        Duration::from_secs(5),
    ));
    assert!(wait_until(|| client.is_ready(), Duration::from_secs(5)));
    assert!(wait_until(|| client.udp_bound(), Duration::from_secs(5)));
    assert_eq!(server.session_count(), 1);
}

#[test]
fn silent_connections_are_dropped_after_the_handshake_timeout() {
    let mut config = server_config();
    config.connection.handshake_timeout = Duration::from_millis(200);
    let server = Server::listen(config, registry()).expect("listen");

    // A raw socket that never says hello
    let stream = std::net::TcpStream::connect(server.local_addr()).expect("connect");
    assert!(wait_until(|| server.session_count() == 1, Duration::from_secs(5)));

    let mut events = Vec::new();
    assert!(wait_until(
        || saw_event(&server, &mut events, |event| matches!(
            event,
            ServerEvent::Disconnected {
                session: 1,
                reason: Some(reason),
            } if reason.contains("timed out")
        )),
        Duration::from_secs(5),
    ));
    assert_eq!(server.session_count(), 0);
    drop(stream);
}

#[test]
fn version_mismatch_is_refused_with_both_versions() {
    let server = Server::listen(server_config(), registry()).expect("listen");
    let mut config = client_config();
    config.version = "2.0".to_string();

    let error = Client::connect(server.local_addr(), config, registry())
        .expect_err("must be refused");
    let ClientError::Refused { reason } = error else {
        panic!("expected a refusal, got {error}");
    };
    assert!(reason.contains("1.0"), "reason was: {reason}");
    assert!(reason.contains("2.0"), "reason was: {reason}");

    // The refused session never connected
    let mut events = Vec::new();
    std::thread::sleep(Duration::from_millis(100));
    assert!(!saw_event(&server, &mut events, |event| matches!(
        event,
        ServerEvent::Connected(_)
    )));
    assert_eq!(server.session_count(), 0);
}

#[test]
fn ownership_gates_invocations_and_sync_vars_converge() {
    let server = Server::listen(server_config(), registry()).expect("listen");
    let owner = Client::connect(server.local_addr(), client_config(), registry())
        .expect("owner connects");
    let watcher = Client::connect(server.local_addr(), client_config(), registry())
        .expect("watcher connects");
    assert_eq!(owner.session_id(), 1);
    assert_eq!(watcher.session_id(), 2);

    // Session 1 owns the avatar; everyone can see it
    let network_id = server
        .spawn(Box::new(Avatar {
            meta: ObjectMeta {
                owner: 1,
                ownership: OwnershipMode::Client,
                visibility: VisibilityMode::Everyone,
                ..ObjectMeta::default()
            },
            ..Avatar::default()
        }))
        .expect("spawn");

    assert!(wait_until(
        || owner.context().directory.contains(network_id),
        Duration::from_secs(5),
    ));
    assert!(wait_until(
        || watcher.context().directory.contains(network_id),
        Duration::from_secs(5),
    ));

    // A non-owner's secure call fails remotely and changes nothing
    let denied = watcher
        .invoke(network_id, "move", vec![ArgValue::F32(9.0), ArgValue::F32(9.0)])
        .expect("invoke");
    assert_eq!(denied, ArgValue::Null);
    let x = server
        .context()
        .directory
        .with_object(network_id, |object| object.sync_var_get("x"))
        .flatten();
    assert_eq!(x, Some(ArgValue::F32(0.0)));

    // The owner's call lands
    let granted = owner
        .invoke(network_id, "move", vec![ArgValue::F32(4.0), ArgValue::F32(-2.5)])
        .expect("invoke");
    assert_eq!(granted, ArgValue::Bool(true));
    let x = server
        .context()
        .directory
        .with_object(network_id, |object| object.sync_var_get("x"))
        .flatten();
    assert_eq!(x, Some(ArgValue::F32(4.0)));

    // The periodic broadcast carries the change to the session that
    // could not make it
    assert!(wait_until(
        || read_f32(&watcher, network_id, "x") == Some(4.0),
        Duration::from_secs(5),
    ));
    assert!(wait_until(
        || read_f32(&watcher, network_id, "y") == Some(-2.5),
        Duration::from_secs(5),
    ));
}
