//! The server coordinator: accept loop, session table, and the operations the
//! hosting application drives the world with.

use std::{
    collections::{HashMap, VecDeque},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, MutexGuard,
    },
    thread::JoinHandle,
    time::Duration,
};

use log::{debug, info, warn};

use tether_shared::{
    dispatch, ArgValue, ConnectionState, CustomId, EncryptionMode, HandshakeError, HostType,
    HybridTransport, IdAllocator, InvocationOutcome, NetworkId, NetworkInvocation, ObjectManage,
    Packet, PacketKind, ReadyStateUpdate, Replicated, ServerHello, Session, SessionContext,
    SessionError, SessionEvent, SessionId, TcpTransport, Transport, TransportError, TypeRegistry,
    SERVER_SESSION_ID,
};

use crate::{
    config::ServerConfig,
    error::ServerError,
    events::{Events, ServerEvent},
    router::UdpRouter,
    worker,
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

pub(crate) struct SessionHandle {
    pub(crate) session: Arc<Session>,
    pass_key: u64,
}

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) context: SessionContext,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    session_ids: Mutex<IdAllocator>,
    events: Mutex<VecDeque<ServerEvent>>,
    pub(crate) router: Option<UdpRouter>,
    shutting_down: AtomicBool,
}

/// A running server. Worker threads pump its sessions; the application polls
/// `receive()` for events and calls the world-mutation operations.
pub struct Server {
    inner: Arc<ServerInner>,
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind and start accepting. Worker count, session ceiling, and protocol
    /// identity come from the config.
    pub fn listen(config: ServerConfig, registry: Arc<TypeRegistry>) -> Result<Self, ServerError> {
        let address = config.socket_addr();
        let listener = TcpListener::bind(address).map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind {
                address: local_addr.to_string(),
                source,
            })?;

        let router = if config.enable_udp {
            // Same port number as the listener, in the datagram namespace
            let udp_addr = SocketAddr::new(config.bind_address, local_addr.port());
            Some(
                UdpRouter::bind(udp_addr).map_err(|source| ServerError::Bind {
                    address: udp_addr.to_string(),
                    source,
                })?,
            )
        } else {
            None
        };

        let worker_count = config.workers.max(1);
        let inner = Arc::new(ServerInner {
            config,
            context: SessionContext::new(registry),
            sessions: Mutex::new(HashMap::new()),
            session_ids: Mutex::new(IdAllocator::new(1)),
            events: Mutex::new(VecDeque::new()),
            router,
            shutting_down: AtomicBool::new(false),
        });

        let mut threads = Vec::new();
        {
            let inner = Arc::clone(&inner);
            threads.push(std::thread::spawn(move || accept_loop(inner, listener)));
        }
        if inner.router.is_some() {
            let inner = Arc::clone(&inner);
            threads.push(std::thread::spawn(move || router_loop(inner)));
        }
        for index in 0..worker_count {
            let inner = Arc::clone(&inner);
            threads.push(std::thread::spawn(move || {
                worker::run(inner, index, worker_count)
            }));
        }

        info!("Server listening on {local_addr}");
        Ok(Self {
            inner,
            local_addr,
            threads,
        })
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drain the event queue.
    pub fn receive(&self) -> Events {
        Events::from_queue(std::mem::take(&mut *lock(&self.inner.events)))
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        lock(&self.inner.sessions).keys().copied().collect()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    pub fn is_ready(&self, session: SessionId) -> bool {
        lock(&self.inner.sessions)
            .get(&session)
            .is_some_and(|handle| handle.session.is_ready())
    }

    /// Announce a ready-state change to a session.
    pub fn mark_ready(&self, session: SessionId, ready: bool) -> Result<(), ServerError> {
        let session = self.inner.session(session)?;
        self.inner.mark_ready(&session, ready)
    }

    pub fn disconnect_session(&self, session: SessionId, reason: &str) {
        self.inner.drop_session(session, Some(reason.to_string()), true);
    }

    /// Register a server-owned object and announce it to every session its
    /// visibility covers.
    pub fn spawn(&self, object: Box<dyn Replicated>) -> Result<NetworkId, ServerError> {
        let (network_id, action) = self.inner.context.directory.spawn(object)?;
        self.inner.fan_out_manage(network_id, &action, None);
        Ok(network_id)
    }

    /// Destroy a live object and announce the destruction.
    pub fn destroy(&self, network_id: NetworkId) -> Result<(), ServerError> {
        // Capture visibility before the object is gone
        let meta = self.inner.context.directory.meta(network_id);
        self.inner
            .context
            .directory
            .handle_destroy(SERVER_SESSION_ID, true, network_id)?;
        self.inner.context.replicator.forget_object(network_id);
        if let Some(meta) = meta {
            let action = ObjectManage::Destroy { network_id };
            self.inner.fan_out_to_visible(&meta, &action, None);
        }
        Ok(())
    }

    /// Call an invocable on an object living on `session`, blocking until the
    /// result arrives or the invoke timeout lapses (which yields Null).
    pub fn invoke(
        &self,
        session: SessionId,
        target: NetworkId,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<ArgValue, ServerError> {
        let session = self.inner.session(session)?;
        let callback_id = self.inner.context.pending.register();
        let invocation = NetworkInvocation {
            callback_id: Some(callback_id),
            method: method.to_string(),
            args,
            ignore_result: false,
        };
        let packet = Packet::targeted(PacketKind::NetworkInvocation, target, &invocation)?;
        if let Err(error) = session.send(packet) {
            self.inner.context.pending.discard(callback_id);
            return Err(error.into());
        }
        let outcome = self
            .inner
            .context
            .pending
            .wait(callback_id, self.inner.config.connection.invoke_timeout);
        Ok(match outcome {
            Some(InvocationOutcome::Success(value)) => value,
            Some(InvocationOutcome::Failure(message)) => {
                warn!("Invocation '{method}' on object {target} failed remotely: {message}");
                ArgValue::Null
            }
            None => ArgValue::Null,
        })
    }

    /// Fire-and-forget invocation: no callback, failures logged remotely.
    pub fn notify(
        &self,
        session: SessionId,
        target: NetworkId,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), ServerError> {
        let session = self.inner.session(session)?;
        let invocation = NetworkInvocation {
            callback_id: None,
            method: method.to_string(),
            args,
            ignore_result: true,
        };
        let packet = Packet::targeted(PacketKind::NetworkInvocation, target, &invocation)?;
        session.send(packet)?;
        Ok(())
    }

    /// Send an application-defined packet to one session.
    pub fn send_custom(
        &self,
        session: SessionId,
        custom_id: CustomId,
        body: Vec<u8>,
        priority: bool,
    ) -> Result<(), ServerError> {
        let session = self.inner.session(session)?;
        let mut packet = Packet::custom(custom_id, body);
        if priority {
            packet = packet.priority();
        }
        session.send(packet)?;
        Ok(())
    }

    /// Diff and broadcast server-side sync-var changes now, instead of
    /// waiting for the next sync interval.
    pub fn sync_now(&self) {
        self.inner.broadcast_sync_vars();
    }

    /// Stop accepting, disconnect every session, and join the threads.
    pub fn shutdown(&mut self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let ids: Vec<SessionId> = lock(&self.inner.sessions).keys().copied().collect();
        for id in ids {
            self.inner.drop_session(id, Some("Server shutting down".to_string()), true);
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        info!("Server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    while !inner.is_shutting_down() {
        match listener.accept() {
            Ok((stream, address)) => inner.accept_connection(stream, address),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_BACKOFF);
            }
            Err(err) => {
                warn!("Accept failed: {err}");
                std::thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
}

fn router_loop(inner: Arc<ServerInner>) {
    // The socket's read timeout paces this loop
    while !inner.is_shutting_down() {
        if let Some(router) = &inner.router {
            router.poll();
        }
    }
}

impl ServerInner {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn push_event(&self, event: ServerEvent) {
        lock(&self.events).push_back(event);
    }

    fn session(&self, id: SessionId) -> Result<Arc<Session>, ServerError> {
        lock(&self.sessions)
            .get(&id)
            .map(|handle| Arc::clone(&handle.session))
            .ok_or(ServerError::UnknownSession { session: id })
    }

    /// Worker `index`'s slice of the session table.
    pub(crate) fn worker_sessions(&self, index: usize, workers: usize) -> Vec<Arc<Session>> {
        lock(&self.sessions)
            .iter()
            .filter(|(id, _)| (**id as usize) % workers == index)
            .map(|(_, handle)| Arc::clone(&handle.session))
            .collect()
    }

    fn accept_connection(&self, stream: TcpStream, address: SocketAddr) {
        let tcp = match TcpTransport::new(stream, self.config.connection.max_packet_size) {
            Ok(tcp) => tcp,
            Err(error) => {
                warn!("Dropping connection from {address}: {error}");
                return;
            }
        };

        if lock(&self.sessions).len() >= self.config.max_sessions {
            // Refuse with a reason the client can surface
            let refused = Session::new(
                0,
                HostType::Server,
                Arc::new(tcp),
                &self.config.connection,
            );
            refused.disconnect(
                &HandshakeError::ServerFull {
                    max_sessions: self.config.max_sessions,
                }
                .to_string(),
            );
            info!("Refused connection from {address}: server full");
            return;
        }

        let id = lock(&self.session_ids).allocate() as SessionId;
        let (transport, pass_key): (Arc<dyn Transport>, u64) = match &self.router {
            Some(router) => match router.socket_clone() {
                Ok(socket) => {
                    let pass_key = fastrand::u64(1..);
                    let (sender, receiver) = mpsc::channel();
                    let hybrid = Arc::new(HybridTransport::routed(tcp, socket, receiver, pass_key));
                    router.register(pass_key, id, Arc::downgrade(&hybrid), sender);
                    (hybrid, pass_key)
                }
                Err(err) => {
                    warn!("No datagram channel for session {id}: {err}");
                    (Arc::new(tcp), 0)
                }
            },
            None => (Arc::new(tcp), 0),
        };

        let session = Arc::new(Session::new(
            id,
            HostType::Server,
            transport,
            &self.config.connection,
        ));
        lock(&self.sessions).insert(id, SessionHandle { session, pass_key });
        debug!("Accepted connection from {address} as session {id}");
    }

    pub(crate) fn drop_session(&self, id: SessionId, reason: Option<String>, notify: bool) {
        let Some(handle) = lock(&self.sessions).remove(&id) else {
            return;
        };
        if notify {
            handle
                .session
                .disconnect(reason.as_deref().unwrap_or("Disconnected"));
        } else {
            handle.session.close_silently();
        }
        if id > 0 {
            lock(&self.session_ids).free(id as u32);
        }
        self.context.directory.forget_session(id);
        if let Some(router) = &self.router {
            router.forget_session(id);
        }
        info!(
            "Session {id} disconnected{}",
            reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        );
        self.push_event(ServerEvent::Disconnected {
            session: id,
            reason,
        });
    }

    /// Pump one session: watchdogs, receive + dispatch, send.
    pub(crate) fn service_session(&self, session: &Arc<Session>) {
        let id = session.id();
        if let Some(reason) = session.check_deadlines() {
            self.drop_session(id, Some(reason), true);
            return;
        }
        // Bounded receive burst per tick so one chatty session cannot starve
        // its worker's other sessions
        for _ in 0..64 {
            match session.poll() {
                Ok(Some(packet)) => {
                    match dispatch(session, &self.context, packet) {
                        Ok(events) => self.handle_session_events(session, events),
                        Err(error) => {
                            self.drop_session(id, Some(error.to_string()), true);
                            return;
                        }
                    }
                    if session.is_shutting_down() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(SessionError::Transport(TransportError::Disconnected))
                | Err(SessionError::Transport(TransportError::ShutDown)) => {
                    self.drop_session(id, Some("Transport closed".to_string()), false);
                    return;
                }
                Err(error) => {
                    self.drop_session(id, Some(error.to_string()), true);
                    return;
                }
            }
        }
        if let Err(error) = session.pump_send() {
            self.drop_session(id, Some(error.to_string()), false);
        }
    }

    fn handle_session_events(&self, session: &Arc<Session>, events: Vec<SessionEvent>) {
        let id = session.id();
        for event in events {
            match event {
                SessionEvent::ClientHello(hello) => self.handle_client_hello(session, hello),
                SessionEvent::ServerHello(_) => {
                    warn!("Unexpected ServerHello from session {id}");
                }
                SessionEvent::PeerReady(ready) => {
                    if ready {
                        self.push_event(ServerEvent::Ready(id));
                    }
                }
                SessionEvent::Disconnected { reason } => {
                    self.drop_session(id, reason, false);
                }
                SessionEvent::EncryptionEstablished => {
                    self.push_event(ServerEvent::EncryptionEstablished(id));
                }
                SessionEvent::ObjectCreated { network_id } => {
                    self.push_event(ServerEvent::ObjectCreated {
                        session: id,
                        network_id,
                    });
                    // One-hop replication to the other sessions
                    self.announce_object(network_id, Some(id));
                }
                SessionEvent::ObjectConfirmed { network_id } => {
                    self.push_event(ServerEvent::ObjectConfirmed {
                        session: id,
                        network_id,
                    });
                }
                SessionEvent::ObjectDestroyed { network_id } => {
                    self.push_event(ServerEvent::ObjectDestroyed {
                        session: id,
                        network_id,
                    });
                    let action = ObjectManage::Destroy { network_id };
                    self.fan_out_manage(network_id, &action, Some(id));
                }
                SessionEvent::ObjectModified { network_id } => {
                    self.push_event(ServerEvent::ObjectModified {
                        session: id,
                        network_id,
                    });
                    self.announce_object(network_id, Some(id));
                }
                SessionEvent::SyncVarsApplied(report) => {
                    self.push_event(ServerEvent::SyncVars {
                        session: id,
                        applied: report.applied.len(),
                        denied: report.denied.len(),
                    });
                    self.relay_sync_vars(id, &report.applied);
                }
                SessionEvent::StreamReceived { stream_id, data } => {
                    self.push_event(ServerEvent::Stream {
                        session: id,
                        stream_id,
                        data,
                    });
                }
                SessionEvent::Custom(packet) => {
                    self.push_event(ServerEvent::Custom {
                        session: id,
                        packet,
                    });
                }
            }
        }
    }

    fn handle_client_hello(&self, session: &Arc<Session>, hello: tether_shared::ClientHello) {
        let id = session.id();
        if session.is_connected() {
            warn!("Duplicate ClientHello from session {id}");
            return;
        }
        if let Err(error) = tether_shared::handshake::validate_hello(
            &self.config.protocol,
            &self.config.version,
            &hello,
        ) {
            let reason = error.to_string();
            session.disconnect(&reason);
            let _ = session.pump_send();
            self.drop_session(id, Some(reason), false);
            return;
        }

        let pass_key = lock(&self.sessions)
            .get(&id)
            .map(|handle| handle.pass_key)
            .unwrap_or(0);
        let reply = ServerHello {
            session_id: id,
            protocol: self.config.protocol.clone(),
            version: self.config.version.clone(),
            custom_packets: self.context.registry.custom_packet_map(),
            ssl: self.config.ssl,
            udp_pass_key: (pass_key != 0).then_some(pass_key),
        };
        let packet = match Packet::with_payload(PacketKind::ServerHello, &reply) {
            Ok(packet) => packet,
            Err(error) => {
                self.drop_session(id, Some(error.to_string()), true);
                return;
            }
        };
        if let Err(error) = session.send(packet) {
            self.drop_session(id, Some(error.to_string()), false);
            return;
        }
        session.set_state(ConnectionState::Connected);
        info!("Session {id} connected ({}/{})", hello.protocol, hello.version);
        self.push_event(ServerEvent::Connected(id));

        if self.config.connection.encryption == EncryptionMode::Required {
            if let Err(error) = session.begin_encryption() {
                warn!("Could not begin encryption with session {id}: {error}");
            }
        }

        // Bring the new session up to date on the replicated world
        for network_id in self.context.directory.network_ids() {
            if let Some(meta) = self.context.directory.meta(network_id) {
                if meta.visible_to(id) {
                    if let Some(action) = self.create_action(network_id) {
                        let _ = self.send_manage(session, &action);
                    }
                }
            }
        }

        if self.config.default_ready {
            if let Err(error) = self.mark_ready(session, true) {
                warn!("Could not mark session {id} ready: {error}");
            }
        }
    }

    fn mark_ready(&self, session: &Session, ready: bool) -> Result<(), ServerError> {
        let update = ReadyStateUpdate { ready };
        let packet = Packet::with_payload(PacketKind::ReadyStateUpdate, &update)?;
        session.send(packet)?;
        session.set_ready(ready);
        if ready {
            self.push_event(ServerEvent::Ready(session.id()));
        }
        Ok(())
    }

    /// The Create action describing a live object's current state.
    fn create_action(&self, network_id: NetworkId) -> Option<ObjectManage> {
        self.context.directory.with_object(network_id, |object| {
            ObjectManage::create_for(object.meta(), object.type_tag(), object.extra_data())
        })
    }

    /// Announce a live object (fresh or modified) to every visible session
    /// except the origin.
    fn announce_object(&self, network_id: NetworkId, origin: Option<SessionId>) {
        if let Some(action) = self.create_action(network_id) {
            self.fan_out_manage(network_id, &action, origin);
        }
    }

    /// Send a manage action to every session the object's visibility covers,
    /// excluding the origin.
    pub(crate) fn fan_out_manage(
        &self,
        network_id: NetworkId,
        action: &ObjectManage,
        origin: Option<SessionId>,
    ) {
        let Some(meta) = self.context.directory.meta(network_id) else {
            return;
        };
        self.fan_out_to_visible(&meta, action, origin);
    }

    fn fan_out_to_visible(
        &self,
        meta: &tether_shared::ObjectMeta,
        action: &ObjectManage,
        origin: Option<SessionId>,
    ) {
        let targets: Vec<Arc<Session>> = lock(&self.sessions)
            .iter()
            .filter(|(id, _)| Some(**id) != origin && meta.visible_to(**id))
            .map(|(_, handle)| Arc::clone(&handle.session))
            .collect();
        for session in targets {
            let _ = self.send_manage(&session, action);
        }
    }

    fn send_manage(&self, session: &Session, action: &ObjectManage) -> Result<(), ServerError> {
        let packet = Packet::with_payload(PacketKind::ObjectManage, action)?;
        session.send(packet)?;
        Ok(())
    }

    /// Re-broadcast applied sync-var entries one hop, to every other session
    /// that can see the touched objects.
    fn relay_sync_vars(&self, origin: SessionId, applied: &[tether_shared::SyncVarEntry]) {
        if applied.is_empty() {
            return;
        }
        let targets: Vec<(SessionId, Arc<Session>)> = lock(&self.sessions)
            .iter()
            .filter(|(id, _)| **id != origin)
            .map(|(id, handle)| (*id, Arc::clone(&handle.session)))
            .collect();
        for (target_id, session) in targets {
            let entries: Vec<tether_shared::SyncVarEntry> = applied
                .iter()
                .filter(|entry| {
                    self.context
                        .directory
                        .meta(entry.network_id)
                        .is_some_and(|meta| meta.visible_to(target_id))
                })
                .cloned()
                .collect();
            if entries.is_empty() {
                continue;
            }
            let update = tether_shared::SyncVarUpdate { entries };
            if let Ok(packet) = Packet::with_payload(PacketKind::SyncVarUpdate, &update) {
                let _ = session.send(packet);
            }
        }
    }

    /// Diff server-side objects and push the changes to every visible
    /// session. Driven by worker 0 on the sync interval.
    pub(crate) fn broadcast_sync_vars(&self) {
        let update = self
            .context
            .replicator
            .collect_updates(&self.context.directory, &self.context.registry);
        if update.entries.is_empty() {
            return;
        }
        let targets: Vec<(SessionId, Arc<Session>)> = lock(&self.sessions)
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(&handle.session)))
            .collect();
        for (target_id, session) in targets {
            let entries: Vec<tether_shared::SyncVarEntry> = update
                .entries
                .iter()
                .filter(|entry| {
                    self.context
                        .directory
                        .meta(entry.network_id)
                        .is_some_and(|meta| meta.visible_to(target_id))
                })
                .cloned()
                .collect();
            if entries.is_empty() {
                continue;
            }
            let update = tether_shared::SyncVarUpdate { entries };
            if let Ok(packet) = Packet::with_payload(PacketKind::SyncVarUpdate, &update) {
                let _ = session.send(packet);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
