//! The client endpoint: connect handshake, session pumping, and the
//! invoke/spawn/sync APIs mirroring the server's.

use std::{
    collections::VecDeque,
    net::{SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use tether_shared::{
    dispatch, ArgValue, ConnectionState, CustomId, EncryptionMode, HostType, HybridTransport,
    InvocationOutcome,
    NetworkId, NetworkInvocation, ObjectManage, Packet, PacketKind, ReadyStateUpdate, Replicated,
    ServerHello, Session, SessionContext, SessionError, SessionEvent, SessionId, TcpTransport,
    Timer, Transport, TransportError, TypeRegistry, UdpTransport,
};

use crate::{config::ClientConfig, error::ClientError};

const PUMP_BACKOFF: Duration = Duration::from_millis(1);

/// What happened on the connection since the last `receive()`.
#[derive(Debug)]
pub enum ClientEvent {
    Disconnected { reason: Option<String> },
    /// The server changed this session's ready state.
    Ready(bool),
    EncryptionEstablished,
    Custom(Packet),
    ObjectCreated { network_id: NetworkId },
    ObjectConfirmed { network_id: NetworkId },
    ObjectDestroyed { network_id: NetworkId },
    ObjectModified { network_id: NetworkId },
    SyncVars { applied: usize, denied: usize },
    Stream { stream_id: i32, data: Vec<u8> },
}

/// A connected client. One `Client` owns exactly one session.
pub struct Client {
    session: Arc<Session>,
    hybrid: Option<Arc<HybridTransport>>,
    context: Arc<SessionContext>,
    events: Arc<Mutex<VecDeque<ClientEvent>>>,
    stopped: Arc<AtomicBool>,
    pump_thread: Option<JoinHandle<()>>,
    config: ClientConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect, run the hello handshake, and (in auto-pump mode) start the
    /// background pump thread.
    pub fn connect(
        address: SocketAddr,
        config: ClientConfig,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).map_err(|err| ClientError::Connect {
            address: address.to_string(),
            reason: err.to_string(),
        })?;
        let tcp = TcpTransport::new(stream, config.connection.max_packet_size)?;

        let mut hybrid = None;
        let transport: Arc<dyn Transport> = if config.enable_udp {
            let udp = UdpTransport::connect(address)?;
            let shared = Arc::new(HybridTransport::client(tcp, udp));
            hybrid = Some(Arc::clone(&shared));
            shared
        } else {
            Arc::new(tcp)
        };

        let session = Arc::new(Session::new(
            0,
            HostType::Client,
            transport,
            &config.connection,
        ));
        let context = Arc::new(SessionContext::new(registry));
        let events = Arc::new(Mutex::new(VecDeque::new()));

        let hello = tether_shared::ClientHello {
            protocol: config.protocol.clone(),
            version: config.version.clone(),
        };
        session.send(Packet::with_payload(PacketKind::ClientHello, &hello)?)?;

        let mut client = Self {
            session,
            hybrid,
            context,
            events,
            stopped: Arc::new(AtomicBool::new(false)),
            pump_thread: None,
            config,
        };
        client.await_server_hello(address)?;

        if client.config.connection.encryption == EncryptionMode::Required {
            client.session.begin_encryption()?;
        }
        if client.config.auto_pump {
            client.start_pump_thread();
        }
        Ok(client)
    }

    fn await_server_hello(&self, address: SocketAddr) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.config.connect_timeout;
        while Instant::now() < deadline {
            self.session.pump_send()?;
            let packet = match self.session.poll() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    std::thread::sleep(PUMP_BACKOFF);
                    continue;
                }
                Err(SessionError::Transport(TransportError::Disconnected)) => {
                    return Err(ClientError::Refused {
                        reason: "connection closed during handshake".to_string(),
                    });
                }
                Err(error) => return Err(error.into()),
            };
            for event in dispatch(&self.session, &self.context, packet)? {
                match event {
                    SessionEvent::ServerHello(hello) => {
                        self.apply_server_hello(hello);
                        self.session.pump_send()?;
                        info!("Connected to {address} as session {}", self.session.id());
                        return Ok(());
                    }
                    SessionEvent::Disconnected { reason } => {
                        return Err(ClientError::Refused {
                            reason: reason.unwrap_or_else(|| "no reason given".to_string()),
                        });
                    }
                    other => queue_event(&self.events, other),
                }
            }
        }
        self.session.disconnect("Hello timed out");
        Err(ClientError::HelloTimeout)
    }

    fn apply_server_hello(&self, hello: ServerHello) {
        self.session.set_id(hello.session_id);
        self.session.set_state(ConnectionState::Connected);
        for (custom_id, name) in &hello.custom_packets {
            // Already-registered ids keep their local name
            let _ = self.context.registry.register_custom(*custom_id, name);
        }
        if let (Some(pass_key), Some(hybrid)) = (hello.udp_pass_key, &self.hybrid) {
            if let Err(error) = hybrid.bind_udp(pass_key) {
                warn!("Could not bind the datagram channel: {error}");
            }
        }
        if hello.ssl {
            debug!("Server advertises transport security");
        }
    }

    fn start_pump_thread(&mut self) {
        let session = Arc::clone(&self.session);
        let context = Arc::clone(&self.context);
        let events = Arc::clone(&self.events);
        let stopped = Arc::clone(&self.stopped);
        let sync_interval = self.config.sync_interval;
        self.pump_thread = Some(std::thread::spawn(move || {
            let mut sync_timer = Timer::new(sync_interval);
            while !stopped.load(Ordering::Acquire) && !session.is_shutting_down() {
                if !pump_once(&session, &context, &events) {
                    break;
                }
                if sync_timer.ringing() {
                    sync_timer.reset();
                    push_sync_vars(&session, &context);
                }
                std::thread::sleep(PUMP_BACKOFF);
            }
            context.pending.poison("session closed");
        }));
    }

    /// Pump the session once (manual mode).
    pub fn pump(&self) {
        pump_once(&self.session, &self.context, &self.events);
    }

    /// Drain the event queue.
    pub fn receive(&self) -> Vec<ClientEvent> {
        lock(&self.events).drain(..).collect()
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected() && !self.session.is_shutting_down()
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Whether priority traffic currently rides the datagram channel.
    pub fn udp_bound(&self) -> bool {
        self.hybrid.as_ref().is_some_and(|hybrid| hybrid.udp_trusted())
    }

    /// Announce this session's ready state to the server.
    pub fn set_ready(&self, ready: bool) -> Result<(), ClientError> {
        let update = ReadyStateUpdate { ready };
        self.session
            .send(Packet::with_payload(PacketKind::ReadyStateUpdate, &update)?)?;
        Ok(())
    }

    /// Call an invocable on a server-side object, blocking until the result
    /// arrives or the invoke timeout lapses (which yields Null). Requires the
    /// pump to be running.
    pub fn invoke(
        &self,
        target: NetworkId,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<ArgValue, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let callback_id = self.context.pending.register();
        let invocation = NetworkInvocation {
            callback_id: Some(callback_id),
            method: method.to_string(),
            args,
            ignore_result: false,
        };
        let packet = Packet::targeted(PacketKind::NetworkInvocation, target, &invocation)?;
        if let Err(error) = self.session.send(packet) {
            self.context.pending.discard(callback_id);
            return Err(error.into());
        }
        let outcome = self
            .context
            .pending
            .wait(callback_id, self.config.connection.invoke_timeout);
        Ok(match outcome {
            Some(InvocationOutcome::Success(value)) => value,
            Some(InvocationOutcome::Failure(message)) => {
                warn!("Invocation '{method}' on object {target} failed remotely: {message}");
                ArgValue::Null
            }
            None => ArgValue::Null,
        })
    }

    /// Fire-and-forget invocation.
    pub fn notify(
        &self,
        target: NetworkId,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), ClientError> {
        let invocation = NetworkInvocation {
            callback_id: None,
            method: method.to_string(),
            args,
            ignore_result: true,
        };
        self.session
            .send(Packet::targeted(PacketKind::NetworkInvocation, target, &invocation)?)?;
        Ok(())
    }

    /// Send an application-defined packet.
    pub fn send_custom(
        &self,
        custom_id: CustomId,
        body: Vec<u8>,
        priority: bool,
    ) -> Result<(), ClientError> {
        let mut packet = Packet::custom(custom_id, body);
        if priority {
            packet = packet.priority();
        }
        self.session.send(packet)?;
        Ok(())
    }

    /// Register a locally constructed object and announce it to the server.
    pub fn spawn(&self, object: Box<dyn Replicated>) -> Result<NetworkId, ClientError> {
        let (network_id, action) = self.context.directory.spawn(object)?;
        self.session
            .send(Packet::with_payload(PacketKind::ObjectManage, &action)?)?;
        Ok(network_id)
    }

    /// Destroy a locally visible object (ownership permitting) and announce
    /// the destruction.
    pub fn destroy(&self, network_id: NetworkId) -> Result<(), ClientError> {
        self.context
            .directory
            .handle_destroy(self.session.id(), false, network_id)?;
        self.context.replicator.forget_object(network_id);
        let action = ObjectManage::Destroy { network_id };
        self.session
            .send(Packet::with_payload(PacketKind::ObjectManage, &action)?)?;
        Ok(())
    }

    /// Diff and push local sync-var changes now, without waiting for the
    /// sync interval.
    pub fn sync_now(&self) {
        push_sync_vars(&self.session, &self.context);
    }

    pub fn disconnect(&mut self, reason: &str) {
        self.session.disconnect(reason);
        self.stop_pump();
    }

    fn stop_pump(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(thread) = self.pump_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.session.is_shutting_down() {
            self.session.disconnect("Client dropped");
        }
        self.stop_pump();
    }
}

/// One pump iteration: flush sends, drain receives, dispatch, convert events.
/// Returns false once the session is gone.
fn pump_once(
    session: &Arc<Session>,
    context: &Arc<SessionContext>,
    events: &Arc<Mutex<VecDeque<ClientEvent>>>,
) -> bool {
    if let Some(reason) = session.check_deadlines() {
        session.disconnect(&reason);
        queue_event(events, SessionEvent::Disconnected {
            reason: Some(reason),
        });
        return false;
    }
    for _ in 0..64 {
        match session.poll() {
            Ok(Some(packet)) => match dispatch(session, context, packet) {
                Ok(dispatched) => {
                    for event in dispatched {
                        queue_event(events, event);
                    }
                    if session.is_shutting_down() {
                        return false;
                    }
                }
                Err(error) => {
                    session.disconnect(&error.to_string());
                    queue_event(events, SessionEvent::Disconnected {
                        reason: Some(error.to_string()),
                    });
                    return false;
                }
            },
            Ok(None) => break,
            Err(error) => {
                session.close_silently();
                queue_event(events, SessionEvent::Disconnected {
                    reason: Some(error.to_string()),
                });
                return false;
            }
        }
    }
    if let Err(error) = session.pump_send() {
        session.close_silently();
        queue_event(events, SessionEvent::Disconnected {
            reason: Some(error.to_string()),
        });
        return false;
    }
    true
}

/// Diff local objects and send any changed fields to the server.
fn push_sync_vars(session: &Arc<Session>, context: &Arc<SessionContext>) {
    let update = context
        .replicator
        .collect_updates(&context.directory, &context.registry);
    if update.entries.is_empty() {
        return;
    }
    match Packet::with_payload(PacketKind::SyncVarUpdate, &update) {
        Ok(packet) => {
            let _ = session.send(packet);
        }
        Err(error) => warn!("Could not serialize sync-var update: {error}"),
    }
}

fn queue_event(events: &Arc<Mutex<VecDeque<ClientEvent>>>, event: SessionEvent) {
    let converted = match event {
        SessionEvent::PeerReady(ready) => ClientEvent::Ready(ready),
        SessionEvent::Disconnected { reason } => ClientEvent::Disconnected { reason },
        SessionEvent::EncryptionEstablished => ClientEvent::EncryptionEstablished,
        SessionEvent::Custom(packet) => ClientEvent::Custom(packet),
        SessionEvent::ObjectCreated { network_id } => ClientEvent::ObjectCreated { network_id },
        SessionEvent::ObjectConfirmed { network_id } => ClientEvent::ObjectConfirmed { network_id },
        SessionEvent::ObjectDestroyed { network_id } => ClientEvent::ObjectDestroyed { network_id },
        SessionEvent::ObjectModified { network_id } => ClientEvent::ObjectModified { network_id },
        SessionEvent::SyncVarsApplied(report) => ClientEvent::SyncVars {
            applied: report.applied.len(),
            denied: report.denied.len(),
        },
        SessionEvent::StreamReceived { stream_id, data } => {
            ClientEvent::Stream { stream_id, data }
        }
        SessionEvent::ClientHello(_) => {
            warn!("Unexpected ClientHello from the server");
            return;
        }
        SessionEvent::ServerHello(_) => {
            warn!("Unexpected duplicate ServerHello");
            return;
        }
    };
    lock(events).push_back(converted);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
