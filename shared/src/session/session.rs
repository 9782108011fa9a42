use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use log::{debug, trace, warn};

use crate::{
    crypto::{self, EncryptionContext},
    handshake::ConnectionStateUpdate,
    session::{
        config::ConnectionConfig, connection_state::ConnectionState, error::SessionError,
    },
    stream::StreamAssembler,
    timer::Timer,
    transport::Transport,
    types::{HostType, SessionId, SERVER_SESSION_ID},
    wire::{
        codec::{self, CodecConfig},
        error::EncodeError,
        flags::PacketFlags,
        packet::Packet,
        packet_kind::PacketKind,
    },
};

struct Timers {
    keepalive: Timer,
    handshake: Timer,
    /// Armed while an encryption handshake is in flight.
    encryption: Option<Timer>,
}

/// One endpoint of a connection: the client's local session, or the server's
/// handle on one connected client.
///
/// Sends are enqueued from any thread and drained by exactly one consumer
/// (a pump thread or a server worker) in enqueue order, one packet at a time.
/// Receives are polled by the same consumer and dispatched inline, or parked
/// on the inbound queue in manual-pump mode.
pub struct Session {
    id: AtomicI32,
    /// Which side of the connection this endpoint is.
    host: HostType,
    transport: Arc<dyn Transport>,
    codec: CodecConfig,
    config: ConnectionConfig,
    state: Mutex<ConnectionState>,
    ready: AtomicBool,
    encryption: Mutex<EncryptionContext>,
    outbound: Mutex<VecDeque<Packet>>,
    inbound: Mutex<VecDeque<Packet>>,
    streams: Mutex<StreamAssembler>,
    shutting_down: AtomicBool,
    timers: Mutex<Timers>,
}

impl Session {
    pub fn new(
        id: SessionId,
        host: HostType,
        transport: Arc<dyn Transport>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            id: AtomicI32::new(id),
            host,
            transport,
            codec: config.codec(),
            config: config.clone(),
            state: Mutex::new(ConnectionState::Handshake),
            ready: AtomicBool::new(false),
            encryption: Mutex::new(EncryptionContext::new()),
            outbound: Mutex::new(VecDeque::new()),
            inbound: Mutex::new(VecDeque::new()),
            streams: Mutex::new(StreamAssembler::new(config.max_packet_size as u64 * 64)),
            shutting_down: AtomicBool::new(false),
            timers: Mutex::new(Timers {
                keepalive: Timer::new(config.keepalive_interval),
                handshake: Timer::new(config.handshake_timeout),
                encryption: None,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id.load(Ordering::Acquire)
    }

    /// Adopt the id the server assigned (client side, after ServerHello).
    pub fn set_id(&self, id: SessionId) {
        self.id.store(id, Ordering::Release);
    }

    pub fn host(&self) -> HostType {
        self.host
    }

    /// The session id packets from the peer carry as their caller: the remote
    /// client's id on the server side, the server's fixed id on the client
    /// side.
    pub fn peer_session_id(&self) -> SessionId {
        if self.host.is_server() {
            self.id()
        } else {
            SERVER_SESSION_ID
        }
    }

    pub fn peer_is_server(&self) -> bool {
        !self.host.is_server()
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run `f` with the session's encryption context.
    pub fn with_encryption<R>(&self, f: impl FnOnce(&mut EncryptionContext) -> R) -> R {
        f(&mut lock(&self.encryption))
    }

    pub fn streams(&self) -> MutexGuard<'_, StreamAssembler> {
        lock(&self.streams)
    }

    /// Enqueue a packet. Order is preserved through the single drain.
    pub fn send(&self, packet: Packet) -> Result<(), SessionError> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        lock(&self.outbound).push_back(packet);
        Ok(())
    }

    /// Drain the send queue onto the transport, sending an idle keepalive
    /// when the interval has lapsed with nothing to say. Returns the number
    /// of packets written. The single-consumer contract is the caller's.
    pub fn pump_send(&self) -> Result<usize, SessionError> {
        let mut sent = 0usize;
        loop {
            let Some(packet) = lock(&self.outbound).pop_front() else {
                break;
            };
            match self.write_packet(&packet) {
                Ok(()) => sent += 1,
                // A packet that cannot be encoded is dropped, not retried
                Err(SessionError::Encode(error)) => {
                    warn!(
                        "Dropping unencodable {:?} packet on session {}: {error}",
                        packet.kind(),
                        self.id()
                    );
                }
                Err(error) => return Err(error),
            }
        }
        let keepalive_due = {
            let mut timers = lock(&self.timers);
            if sent > 0 {
                timers.keepalive.reset();
                false
            } else if timers.keepalive.ringing() {
                timers.keepalive.reset();
                true
            } else {
                false
            }
        };
        if keepalive_due && self.is_connected() {
            self.write_packet(&Packet::keepalive())?;
            sent += 1;
        }
        Ok(sent)
    }

    fn write_packet(&self, packet: &Packet) -> Result<(), SessionError> {
        let wire = {
            let mut encryption = lock(&self.encryption);
            codec::encode(packet, &mut encryption, &self.codec)?
        };
        trace!(
            "Session {} sending {:?} ({} bytes)",
            self.id(),
            packet.kind(),
            wire.len()
        );
        if packet.header.flags.contains(PacketFlags::PRIORITY) {
            self.transport.send_priority(&wire)?;
        } else {
            self.transport.send(&wire)?;
        }
        Ok(())
    }

    /// Poll the transport for one decoded packet. Non-fatal decode errors
    /// drop the offending packet and report nothing; fatal ones propagate so
    /// the caller tears the session down.
    pub fn poll(&self) -> Result<Option<Packet>, SessionError> {
        let Some(wire) = self.transport.recv()? else {
            return Ok(None);
        };
        let decoded = {
            let mut encryption = lock(&self.encryption);
            codec::decode(&wire, &mut encryption, &self.codec)
        };
        match decoded {
            Ok(packet) => Ok(Some(packet)),
            Err(error) if error.is_fatal() => Err(error.into()),
            Err(error) => {
                warn!("Dropping undecodable packet on session {}: {error}", self.id());
                Ok(None)
            }
        }
    }

    /// Park a packet for a later manual `take_received` (manual-pump mode).
    pub fn queue_received(&self, packet: Packet) {
        lock(&self.inbound).push_back(packet);
    }

    pub fn take_received(&self) -> Option<Packet> {
        lock(&self.inbound).pop_front()
    }

    /// Start the encryption key exchange from this side and arm its watchdog.
    pub fn begin_encryption(&self) -> Result<(), SessionError> {
        let outbound = {
            let mut encryption = lock(&self.encryption);
            crypto::handshake::begin(&mut encryption).map_err(EncodeError::Crypto)?
        };
        self.arm_encryption_watchdog();
        self.send(encryption_packet(&outbound)?)
    }

    /// Arm the encryption watchdog (receiver side, on the first handshake
    /// message).
    pub fn arm_encryption_watchdog(&self) {
        let mut timers = lock(&self.timers);
        if timers.encryption.is_none() {
            timers.encryption = Some(Timer::new(self.config.encryption_timeout));
        }
    }

    /// Check the handshake and encryption watchdogs, returning the disconnect
    /// reason if one has lapsed.
    pub fn check_deadlines(&self) -> Option<String> {
        let mut timers = lock(&self.timers);
        if !self.state().is_connected() && timers.handshake.ringing() {
            return Some("Handshake timed out".to_string());
        }
        if timers.encryption.as_ref().is_some_and(Timer::ringing) {
            let trusted = lock(&self.encryption).state().asymmetric_ready();
            if !trusted {
                return Some("Encryption handshake timed out".to_string());
            }
            timers.encryption = None;
        }
        None
    }

    /// Close the session, making a best effort to tell the peer why first.
    pub fn disconnect(&self, reason: &str) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Session {} disconnecting: {reason}", self.id());
        let update = ConnectionStateUpdate::disconnect(reason);
        if let Ok(packet) = Packet::with_payload(PacketKind::ConnectionStateUpdate, &update) {
            if let Err(error) = self.write_packet(&packet) {
                debug!(
                    "Could not deliver disconnect reason on session {}: {error}",
                    self.id()
                );
            }
        }
        self.transport.shutdown();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Close the session after the peer announced it is going away. Nothing
    /// more is sent.
    pub fn close_silently(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.transport.shutdown();
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Wrap a handshake message for the wire. The symmetric key rides under the
/// asymmetric cipher; every other handshake message is explicitly plaintext.
pub fn encryption_packet(
    outbound: &crypto::handshake::OutboundEncryption,
) -> Result<Packet, SessionError> {
    let mut packet = Packet::with_payload(PacketKind::Encryption, &outbound.message)?;
    if outbound.protect {
        packet.header.flags = packet.header.flags.with(PacketFlags::ASYMMETRICAL);
    } else {
        packet = packet.plaintext();
    }
    Ok(packet)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
