//! Routes decoded packets to the subsystem that handles their kind.
//!
//! Dispatch never blocks on application code beyond the invoked handler
//! itself; everything it wants sent back goes through the session's send
//! queue, and everything the application should see comes back as events.

use std::sync::{Arc, Mutex};

use log::{trace, warn};

use crate::{
    crypto::{self, EncryptionState},
    handshake::{ClientHello, ConnectionStateUpdate, ReadyStateUpdate, ServerHello},
    registry::{InvocationContext, TypeRegistry},
    replication::{
        directory::ObjectDirectory,
        manage::ObjectManage,
        object::Replicated,
        sync_var::{SyncVarReplicator, SyncVarReport, SyncVarUpdate},
    },
    rpc::{
        self,
        error::RpcError,
        invocation::{NetworkInvocation, NetworkInvocationResult},
        pending::PendingInvocations,
    },
    session::{
        connection_state::ConnectionState,
        error::SessionError,
        session::{encryption_packet, Session},
    },
    stream::StreamMessage,
    types::NetworkId,
    wire::{packet::Packet, packet_kind::PacketKind},
};

/// The shared state packet dispatch works against. One per endpoint process,
/// shared by every session the endpoint runs.
pub struct SessionContext {
    pub registry: Arc<TypeRegistry>,
    pub directory: Arc<ObjectDirectory>,
    pub replicator: Arc<SyncVarReplicator>,
    pub pending: Arc<PendingInvocations>,
    /// Answers invocations addressed to the session itself (target id 0).
    /// Its registered type supplies the invocable table; absent by default.
    session_object: Mutex<Option<Box<dyn Replicated>>>,
}

impl SessionContext {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            directory: Arc::new(ObjectDirectory::new()),
            replicator: Arc::new(SyncVarReplicator::new()),
            pending: Arc::new(PendingInvocations::new()),
            session_object: Mutex::new(None),
        }
    }

    /// Install the object that handles session-addressed invocations.
    pub fn set_session_object(&self, object: Box<dyn Replicated>) {
        *lock(&self.session_object) = Some(object);
    }
}

/// What a dispatched packet meant for the application layer.
#[derive(Debug)]
pub enum SessionEvent {
    /// The peer announced a ready-state change.
    PeerReady(bool),
    /// The peer closed the session (or a fatal violation closed it locally).
    Disconnected { reason: Option<String> },
    /// Both ends now speak the symmetric cipher.
    EncryptionEstablished,
    /// A client introduced itself; the server layer validates and replies.
    ClientHello(ClientHello),
    /// The server accepted this session; the client layer applies it.
    ServerHello(ServerHello),
    /// The peer created an object here (remote-initiated).
    ObjectCreated { network_id: NetworkId },
    /// The peer confirmed a create/destroy/modify we initiated.
    ObjectConfirmed { network_id: NetworkId },
    /// The peer destroyed an object here (remote-initiated).
    ObjectDestroyed { network_id: NetworkId },
    /// The peer modified an object here (remote-initiated).
    ObjectModified { network_id: NetworkId },
    /// A sync-var batch was applied; the report carries relay candidates.
    SyncVarsApplied(SyncVarReport),
    StreamReceived { stream_id: i32, data: Vec<u8> },
    /// An application packet no registered listener consumed.
    Custom(Packet),
}

/// Dispatch one received packet, queueing any protocol replies on the session
/// and returning the application-visible events.
pub fn dispatch(
    session: &Session,
    ctx: &SessionContext,
    packet: Packet,
) -> Result<Vec<SessionEvent>, SessionError> {
    let mut events = Vec::new();
    let caller = session.peer_session_id();
    let caller_is_server = session.peer_is_server();

    match packet.kind() {
        PacketKind::None => {
            trace!("Keepalive from session {}", session.id());
        }
        PacketKind::ReadyStateUpdate => {
            let Some(update) = parse::<ReadyStateUpdate>(session, &packet) else {
                return Ok(events);
            };
            session.set_ready(update.ready);
            events.push(SessionEvent::PeerReady(update.ready));
        }
        PacketKind::ConnectionStateUpdate => {
            let Some(update) = parse::<ConnectionStateUpdate>(session, &packet) else {
                return Ok(events);
            };
            match update.state {
                ConnectionState::Disconnected => {
                    session.close_silently();
                    ctx.pending.poison("peer disconnected");
                    events.push(SessionEvent::Disconnected {
                        reason: update.reason,
                    });
                }
                state => session.set_state(state),
            }
        }
        PacketKind::ClientHello => {
            let Some(hello) = parse::<ClientHello>(session, &packet) else {
                return Ok(events);
            };
            events.push(SessionEvent::ClientHello(hello));
        }
        PacketKind::ServerHello => {
            let Some(hello) = parse::<ServerHello>(session, &packet) else {
                return Ok(events);
            };
            events.push(SessionEvent::ServerHello(hello));
        }
        PacketKind::NetworkInvocation => {
            let Some(invocation) = parse::<NetworkInvocation>(session, &packet) else {
                return Ok(events);
            };
            let context = InvocationContext {
                caller,
                caller_is_server,
            };
            let target = packet.target();
            let reply = invoke_on_target(ctx, &context, target, &invocation);
            if let Some(result) = reply {
                session.send(Packet::with_payload(
                    PacketKind::NetworkInvocationResult,
                    &result,
                )?)?;
            }
        }
        PacketKind::NetworkInvocationResult => {
            let Some(result) = parse::<NetworkInvocationResult>(session, &packet) else {
                return Ok(events);
            };
            if !ctx.pending.complete(result.callback_id, result.outcome) {
                warn!(
                    "Unmatched invocation result with callback id {} from session {}",
                    result.callback_id,
                    session.id()
                );
            }
        }
        PacketKind::Encryption => {
            let Some(message) = parse::<crypto::EncryptionMessage>(session, &packet) else {
                return Ok(events);
            };
            session.arm_encryption_watchdog();
            let outcome = session.with_encryption(|encryption| {
                crypto::handshake::handle_message(encryption, session.host(), message)
            });
            match outcome {
                Ok(replies) => {
                    for outbound in replies {
                        session.send(encryption_packet(&outbound)?)?;
                    }
                    let state = session.with_encryption(|encryption| encryption.state());
                    if state == EncryptionState::Encrypted {
                        events.push(SessionEvent::EncryptionEstablished);
                    }
                }
                Err(error) if error.is_fatal() => {
                    let reason = error.to_string();
                    session.disconnect(&reason);
                    events.push(SessionEvent::Disconnected {
                        reason: Some(reason),
                    });
                }
                Err(error) => {
                    warn!(
                        "Ignoring bad encryption message on session {}: {error}",
                        session.id()
                    );
                }
            }
        }
        PacketKind::SyncVarUpdate => {
            let Some(update) = parse::<SyncVarUpdate>(session, &packet) else {
                return Ok(events);
            };
            let report =
                ctx.replicator
                    .apply(&ctx.directory, &ctx.registry, caller, caller_is_server, update);
            events.push(SessionEvent::SyncVarsApplied(report));
        }
        PacketKind::ObjectManage => {
            let Some(action) = parse::<ObjectManage>(session, &packet) else {
                return Ok(events);
            };
            handle_object_manage(session, ctx, caller, caller_is_server, action, &mut events)?;
        }
        PacketKind::Stream => {
            let Some(message) = parse::<StreamMessage>(session, &packet) else {
                return Ok(events);
            };
            match session.streams().handle(message) {
                Ok(Some((stream_id, data))) => {
                    events.push(SessionEvent::StreamReceived { stream_id, data });
                }
                Ok(None) => {}
                Err(error) => {
                    warn!("Dropping stream chunk on session {}: {error}", session.id());
                }
            }
        }
        PacketKind::Custom => {
            let custom_id = packet.header.custom_id;
            let context = InvocationContext {
                caller,
                caller_is_server,
            };
            let mut consumed = false;
            let target = packet.target();
            if target != 0 {
                if let Some(entry) = ctx
                    .directory
                    .type_tag(target)
                    .and_then(|tag| ctx.registry.entry(tag))
                {
                    ctx.directory.with_object(target, |object| {
                        for listener in entry.listeners_for(custom_id) {
                            (listener.handler)(object, &context, &packet);
                            consumed = true;
                        }
                    });
                }
            }
            if !consumed {
                if ctx.registry.custom_name(custom_id).is_some() || target == 0 {
                    events.push(SessionEvent::Custom(packet));
                } else {
                    warn!(
                        "Dropping custom packet with unknown id {custom_id} on session {}",
                        session.id()
                    );
                }
            }
        }
    }
    Ok(events)
}

/// Resolve, authorize, and run one invocation against its target: the
/// session object for target id 0, a directory object otherwise.
fn invoke_on_target(
    ctx: &SessionContext,
    context: &InvocationContext,
    target: NetworkId,
    invocation: &NetworkInvocation,
) -> Option<NetworkInvocationResult> {
    if target == 0 {
        return invoke_on_session(ctx, context, invocation);
    }
    let entry = match ctx
        .directory
        .type_tag(target)
        .and_then(|tag| ctx.registry.entry(tag))
    {
        Some(entry) => entry,
        None => return failure_reply(invocation, target, &RpcError::TargetNotFound { target }),
    };
    let dispatched = ctx.directory.with_object(target, |object| {
        rpc::dispatch_invocation(entry.invocables, object, context, target, invocation)
    });
    match dispatched {
        Some(reply) => reply,
        None => failure_reply(invocation, target, &RpcError::TargetNotFound { target }),
    }
}

fn invoke_on_session(
    ctx: &SessionContext,
    context: &InvocationContext,
    invocation: &NetworkInvocation,
) -> Option<NetworkInvocationResult> {
    let mut guard = lock(&ctx.session_object);
    let Some(object) = guard.as_deref_mut() else {
        return failure_reply(invocation, 0, &RpcError::TargetNotFound { target: 0 });
    };
    let Some(entry) = ctx.registry.entry(object.type_tag()) else {
        return failure_reply(invocation, 0, &RpcError::TargetNotFound { target: 0 });
    };
    rpc::dispatch_invocation(entry.invocables, object, context, 0, invocation)
}

fn failure_reply(
    invocation: &NetworkInvocation,
    target: NetworkId,
    error: &RpcError,
) -> Option<NetworkInvocationResult> {
    if invocation.ignore_result {
        warn!(
            "Fire-and-forget invocation '{}' on object {target} dropped: {error}",
            invocation.method
        );
        return None;
    }
    invocation
        .callback_id
        .map(|callback_id| NetworkInvocationResult {
            callback_id,
            outcome: crate::rpc::invocation::InvocationOutcome::Failure(error.to_string()),
        })
}

fn handle_object_manage(
    session: &Session,
    ctx: &SessionContext,
    caller: crate::types::SessionId,
    caller_is_server: bool,
    action: ObjectManage,
    events: &mut Vec<SessionEvent>,
) -> Result<(), SessionError> {
    match action {
        ObjectManage::Create {
            network_id,
            type_tag,
            owner,
            ownership,
            visibility,
            active,
            extra,
        } => {
            let outcome = ctx.directory.handle_create(
                &ctx.registry,
                network_id,
                type_tag,
                owner,
                ownership,
                visibility,
                active,
                &extra,
            );
            match outcome {
                Ok(reply) => {
                    let created = matches!(reply, ObjectManage::ConfirmCreate { .. });
                    session.send(Packet::with_payload(PacketKind::ObjectManage, &reply)?)?;
                    if created {
                        events.push(SessionEvent::ObjectCreated { network_id });
                    }
                }
                Err(error) => {
                    warn!(
                        "Rejected create for object {network_id} from session {caller}: {error}"
                    );
                }
            }
        }
        ObjectManage::ConfirmCreate { network_id } | ObjectManage::AlreadyExists { network_id } => {
            ctx.directory.confirm_create(network_id, caller);
            events.push(SessionEvent::ObjectConfirmed { network_id });
        }
        ObjectManage::Destroy { network_id } => {
            match ctx.directory.handle_destroy(caller, caller_is_server, network_id) {
                Ok(reply) => {
                    ctx.replicator.forget_object(network_id);
                    session.send(Packet::with_payload(PacketKind::ObjectManage, &reply)?)?;
                    events.push(SessionEvent::ObjectDestroyed { network_id });
                }
                Err(error) => {
                    warn!(
                        "Rejected destroy of object {network_id} from session {caller}: {error}"
                    );
                }
            }
        }
        ObjectManage::ConfirmDestroy { network_id } => {
            ctx.replicator.forget_object(network_id);
            events.push(SessionEvent::ObjectConfirmed { network_id });
        }
        ObjectManage::Modify { network_id, change } => {
            match ctx
                .directory
                .handle_modify(caller, caller_is_server, network_id, &change)
            {
                Ok(reply) => {
                    let confirmed = reply.network_id();
                    session.send(Packet::with_payload(PacketKind::ObjectManage, &reply)?)?;
                    events.push(SessionEvent::ObjectModified {
                        network_id: confirmed,
                    });
                }
                Err(error) => {
                    warn!(
                        "Rejected modify of object {network_id} from session {caller}: {error}"
                    );
                }
            }
        }
        ObjectManage::ConfirmModify { network_id } => {
            events.push(SessionEvent::ObjectConfirmed { network_id });
        }
    }
    Ok(())
}

/// Deserialize a typed body, logging and dropping the packet on failure.
fn parse<T: serde::de::DeserializeOwned>(session: &Session, packet: &Packet) -> Option<T> {
    match packet.payload::<T>() {
        Ok(body) => Some(body),
        Err(error) => {
            warn!(
                "Dropping malformed {:?} packet on session {}: {error}",
                packet.kind(),
                session.id()
            );
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::InvocableDescriptor,
        replication::{
            error::ReplicationError,
            object::{ObjectMeta, ReplicatedType},
        },
        rpc::{invocation::InvocationOutcome, value::ArgValue},
        types::TypeTag,
    };

    #[derive(Default)]
    struct Lobby {
        meta: ObjectMeta,
    }

    impl Replicated for Lobby {
        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }
        fn type_tag(&self) -> TypeTag {
            Self::TYPE_TAG
        }
        fn sync_var_get(&self, _field: &str) -> Option<ArgValue> {
            None
        }
        fn sync_var_set(&mut self, field: &str, _value: &ArgValue) -> Result<(), ReplicationError> {
            Err(ReplicationError::UnknownField {
                network_id: 0,
                field: field.to_string(),
            })
        }
    }

    fn ping(
        _: &mut dyn Replicated,
        _: &InvocationContext,
        _: &[ArgValue],
    ) -> Result<ArgValue, RpcError> {
        Ok(ArgValue::Str("pong".into()))
    }

    const LOBBY_INVOCABLES: &[InvocableDescriptor] = &[InvocableDescriptor {
        name: "ping",
        direction: crate::registry::InvokeDirection::Either,
        secure: false,
        params: &[],
        required: 0,
        handler: ping,
    }];

    impl ReplicatedType for Lobby {
        const TYPE_TAG: TypeTag = 42;
        const TYPE_NAME: &'static str = "Lobby";
        fn list_invocables() -> &'static [InvocableDescriptor] {
            LOBBY_INVOCABLES
        }
    }

    fn context_with_lobby() -> SessionContext {
        let registry = Arc::new(TypeRegistry::new());
        registry.register::<Lobby>().expect("register");
        SessionContext::new(registry)
    }

    fn ping_invocation() -> NetworkInvocation {
        NetworkInvocation {
            callback_id: Some(1),
            method: "ping".into(),
            args: vec![],
            ignore_result: false,
        }
    }

    #[test]
    fn session_addressed_invocation_reaches_the_session_object() {
        let ctx = context_with_lobby();
        ctx.set_session_object(Box::new(Lobby::default()));
        let caller = InvocationContext {
            caller: 3,
            caller_is_server: false,
        };
        let reply = invoke_on_target(&ctx, &caller, 0, &ping_invocation()).expect("reply");
        assert_eq!(reply.callback_id, 1);
        assert_eq!(
            reply.outcome,
            InvocationOutcome::Success(ArgValue::Str("pong".into()))
        );
    }

    #[test]
    fn session_addressed_invocation_without_an_object_fails_structurally() {
        let ctx = context_with_lobby();
        let caller = InvocationContext {
            caller: 3,
            caller_is_server: false,
        };
        let reply = invoke_on_target(&ctx, &caller, 0, &ping_invocation()).expect("reply");
        assert!(matches!(reply.outcome, InvocationOutcome::Failure(_)));
    }
}
