//! Iris, the network hub
//!
//! One task owns the transport, the connection registry and the session
//! table, and multiplexes every client on them. It decodes inbound frames
//! into the three bundle queues and executes send requests that arrive from
//! the simulation through an [`IrisHandle`].
//!
//! The registry is only touched here. The simulation side reaches it
//! indirectly: every `send_*` and `disconnect` call on the handle becomes a
//! [`HubCommand`] that the loop runs in order with inbound traffic.

use crate::bundles::{EventBundle, MessageBundle, StateBundle};
use crate::config::HubConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::queues::{Bundles, QueueClosed};
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::session::{ConnectionState, DisconnectReason, SessionTable};
use crate::transport::{ConnectionHandle, Transport, TransportEvent, UdpTransport};
use log::{debug, error, info, warn};
use shared::{encode, event_tag, split_frame, Codec, CodecError, Packet, PacketKind, PlayerRef};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Emit a housekeeping summary every this many housekeeping passes
const SUMMARY_EVERY: u64 = 200;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("message of {len} bytes exceeds limit of {max}")]
    MessageTooLong { len: usize, max: usize },
    #[error("hub is not running")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed handshake: {0}")]
    Malformed(#[from] CodecError),
    #[error("authentication rejected: {0}")]
    Rejected(&'static str),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Target of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Player(PlayerRef),
    /// Every active connection
    Broadcast,
}

/// Requests from the simulation side, executed on the network loop
#[derive(Debug)]
pub enum HubCommand {
    SubmitState(StateBundle),
    SendState(u64),
    SendEvent {
        player: PlayerRef,
        tag: u8,
        payload: Vec<u8>,
    },
    SendMessage {
        recipient: Recipient,
        text: String,
    },
    Disconnect(PlayerRef),
}

pub struct Iris<T: Transport> {
    transport: T,
    config: HubConfig,
    codec: Codec,
    registry: ConnectionRegistry,
    sessions: SessionTable,
    bundles: Arc<Bundles>,
    diagnostics: Arc<Diagnostics>,
    running: Arc<AtomicBool>,

    command_tx: mpsc::UnboundedSender<HubCommand>,
    command_rx: mpsc::UnboundedReceiver<HubCommand>,

    // Inbound state collected since the last push to the state queue
    pending_states: BTreeMap<PlayerRef, Vec<u8>>,
    pending_since: Instant,
    next_inbound_sequence: u64,

    // Outbound bundles submitted by the simulation, by sequence
    outbound: BTreeMap<u64, StateBundle>,
    last_broadcast: Option<u64>,

    closing: Vec<ConnectionHandle>,
    housekeeping_passes: u64,
}

impl Iris<UdpTransport> {
    /// Binds the UDP socket. Failing here is the only fatal hub error.
    pub async fn bind(config: HubConfig) -> Result<Self, HubError> {
        let transport = UdpTransport::bind(&config.bind_addr).await?;
        info!("Iris listening on {}", transport.local_addr()?);
        Ok(Self::new(transport, config))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T: Transport> Iris<T> {
    pub fn new(transport: T, config: HubConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Self {
            transport,
            codec: config.codec(),
            registry: ConnectionRegistry::new(config.max_clients),
            sessions: SessionTable::new(),
            bundles: Arc::new(Bundles::new(config.state_queue_capacity)),
            diagnostics: Arc::new(Diagnostics::default()),
            running: Arc::new(AtomicBool::new(true)),
            command_tx,
            command_rx,
            pending_states: BTreeMap::new(),
            pending_since: Instant::now(),
            next_inbound_sequence: 0,
            outbound: BTreeMap::new(),
            last_broadcast: None,
            closing: Vec::new(),
            housekeeping_passes: 0,
            config,
        }
    }

    /// Returns the simulation-side interface to this hub.
    pub fn handle(&self) -> IrisHandle {
        IrisHandle {
            bundles: Arc::clone(&self.bundles),
            diagnostics: Arc::clone(&self.diagnostics),
            running: Arc::clone(&self.running),
            commands: self.command_tx.clone(),
            max_message_len: self.config.max_message_len,
        }
    }

    pub fn connection_state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.sessions.state(handle)
    }

    pub fn player_count(&self) -> usize {
        self.registry.len()
    }

    /// Receive loop. Returns once the running flag is cleared, after every
    /// client has been told and every queue closed.
    pub async fn run(&mut self) -> Result<(), HubError> {
        let period = self.config.poll_interval.min(self.config.state_flush_interval);
        let mut housekeeping = interval(period);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Iris started");

        while self.running.load(Ordering::Acquire) {
            tokio::select! {
                event = self.transport.recv() => {
                    match event {
                        Ok(event) => self.dispatch(event),
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                Some(command) = self.command_rx.recv() => {
                    self.execute(command);
                },

                _ = housekeeping.tick() => {
                    self.housekeep();
                },
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Routes one transport event.
    pub fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(handle) => {
                debug!("{} connecting", handle);
                self.sessions.open(handle);
            }
            TransportEvent::Datagram(handle, bytes) => self.receive(handle, &bytes),
            TransportEvent::Disconnected(handle) => {
                self.begin_disconnect(handle, DisconnectReason::TransportError);
            }
        }
        self.finish_disconnects();
    }

    fn receive(&mut self, handle: ConnectionHandle, bytes: &[u8]) {
        self.diagnostics.packet_received();

        let session = self.sessions.open(handle);
        if !session.is_live() {
            return;
        }
        session.touch();

        let (kind, payload) = match split_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.reject_packet(handle, e);
                return;
            }
        };

        match kind {
            PacketKind::Auth => {
                if let Err(e) = self.auth(handle, payload) {
                    debug!("Auth from {} failed: {}", handle, e);
                }
            }
            PacketKind::State => self.parse_state(handle, payload),
            PacketKind::Event => self.parse_event(handle, payload),
            PacketKind::Message => self.parse_message(handle, payload),
            PacketKind::Disconnect => match self.codec.decode_disconnect(payload) {
                Ok(()) => self.begin_disconnect(handle, DisconnectReason::Requested),
                Err(e) => self.reject_packet(handle, e),
            },
        }
    }

    /// Validates a handshake and allocates a player for the connection.
    ///
    /// A second Auth on an already mapped connection changes nothing. A
    /// malformed or bad credential or a full server is answered with a reason
    /// and a Disconnect and the connection is dropped without touching the
    /// registry.
    pub fn auth(&mut self, handle: ConnectionHandle, payload: &[u8]) -> Result<PlayerRef, AuthError> {
        if self.registry.resolve(handle).is_some() {
            warn!("{} sent Auth again, ignoring", handle);
            return Err(RegistryError::AlreadyConnected(handle).into());
        }

        let token = match self.codec.decode_auth(payload) {
            Ok(token) => token,
            Err(e) => {
                self.diagnostics.decode_error();
                self.reject_auth(handle, "Malformed credentials");
                return Err(e.into());
            }
        };

        if !self.config.accepts_token(&token) {
            self.reject_auth(handle, "Invalid credentials");
            return Err(AuthError::Rejected("invalid credentials"));
        }

        let player = match self.registry.on_connect(handle) {
            Ok(player) => player,
            Err(e) => {
                self.reject_auth(handle, "Server full");
                return Err(e.into());
            }
        };

        let session = self.sessions.open(handle);
        session.state = ConnectionState::Authenticated;
        session.player = Some(player);
        info!("{} authenticated as {}", handle, player);

        let accepted = Packet::Event {
            tag: event_tag::ACCEPTED,
            payload: player.to_bytes().to_vec(),
        };
        if let Some(frame) = encode_outbound(&accepted) {
            self.send_to(handle, &frame);
        }

        Ok(player)
    }

    fn reject_auth(&mut self, handle: ConnectionHandle, reason: &str) {
        self.diagnostics.auth_rejected();
        info!("Rejecting {}: {}", handle, reason);

        self.notify(
            handle,
            &Packet::Message {
                text: reason.to_string(),
            },
        );
        self.notify(handle, &Packet::Disconnect);
        self.transport.close(handle);
        self.sessions.remove(handle);
    }

    pub fn parse_state(&mut self, handle: ConnectionHandle, payload: &[u8]) {
        let Some(player) = self.resolve_live(handle) else {
            return;
        };
        let record = match self.codec.decode_state(payload) {
            Ok(record) => record,
            Err(e) => {
                self.reject_packet(handle, e);
                return;
            }
        };

        if let Some(session) = self.sessions.get_mut(handle) {
            if session.state == ConnectionState::Authenticated {
                session.state = ConnectionState::Active;
                info!("{} is now active", player);
            }
        }

        // A second record from the same player closes the open bundle
        if self.pending_states.contains_key(&player) {
            self.flush_inbound();
        }
        if self.pending_states.is_empty() {
            self.pending_since = Instant::now();
        }
        self.pending_states.insert(player, record);

        if self.pending_states.len() >= self.sessions.active_count() {
            self.flush_inbound();
        }
    }

    pub fn parse_event(&mut self, handle: ConnectionHandle, payload: &[u8]) {
        let Some(player) = self.resolve_live(handle) else {
            return;
        };
        let (tag, payload) = match self.codec.decode_event(payload) {
            Ok(event) => event,
            Err(e) => {
                self.reject_packet(handle, e);
                return;
            }
        };
        if event_tag::is_reserved(tag) {
            self.reject_packet(
                handle,
                CodecError::Malformed(format!("client sent reserved event tag {:#04x}", tag)),
            );
            return;
        }

        let event = EventBundle {
            user_ref: player,
            tag,
            payload,
        };
        if self.bundles.events.push(event).is_err() {
            debug!("Event list closed, dropping event from {}", player);
        }
    }

    pub fn parse_message(&mut self, handle: ConnectionHandle, payload: &[u8]) {
        let Some(player) = self.resolve_live(handle) else {
            return;
        };
        let message = match self.codec.decode_message(payload) {
            Ok(text) => text,
            Err(e) => {
                self.reject_packet(handle, e);
                return;
            }
        };

        let bundle = MessageBundle {
            user_ref: player,
            message,
        };
        if self.bundles.messages.push(bundle).is_err() {
            debug!("Message list closed, dropping message from {}", player);
        }
    }

    /// Player behind a live, authenticated connection.
    fn resolve_live(&mut self, handle: ConnectionHandle) -> Option<PlayerRef> {
        let live = self.sessions.get(handle).map_or(false, |s| s.is_live());
        match self.registry.resolve(handle) {
            Some(player) if live => Some(player),
            _ => {
                self.diagnostics.unknown_sender();
                debug!("Dropping packet from unauthenticated {}", handle);
                None
            }
        }
    }

    fn reject_packet(&mut self, handle: ConnectionHandle, error: CodecError) {
        self.diagnostics.decode_error();

        let Some(session) = self.sessions.get_mut(handle) else {
            return;
        };
        session.decode_errors += 1;
        warn!(
            "Dropped packet from {} ({} so far): {}",
            handle, session.decode_errors, error
        );

        if session.decode_errors > self.config.max_decode_errors {
            warn!("{} exceeded malformed packet limit", handle);
            self.begin_disconnect(handle, DisconnectReason::ProtocolViolation);
        }
    }

    /// Pushes the open inbound bundle onto the state queue, waiting for room
    /// when the queue is bounded and full.
    fn flush_inbound(&mut self) {
        let Some(bundle) = self.close_inbound() else {
            return;
        };
        match self.bundles.states.push(bundle) {
            Ok(()) => self.next_inbound_sequence += 1,
            Err(QueueClosed) => debug!("State queue closed, dropping inbound bundle"),
        }
    }

    fn close_inbound(&mut self) -> Option<StateBundle> {
        let registry = &self.registry;
        self.pending_states.retain(|player, _| registry.contains(*player));
        if self.pending_states.is_empty() {
            return None;
        }

        let users = self.sessions.active_count();
        let states = std::mem::take(&mut self.pending_states);
        Some(StateBundle {
            ready: states.len() >= users,
            users,
            sequence: self.next_inbound_sequence,
            states,
        })
    }

    fn execute(&mut self, command: HubCommand) {
        match command {
            HubCommand::SubmitState(bundle) => self.submit_state(bundle),
            HubCommand::SendState(sequence) => self.send_state(sequence),
            HubCommand::SendEvent {
                player,
                tag,
                payload,
            } => self.send_event(player, tag, &payload),
            HubCommand::SendMessage { recipient, text } => self.send_message(recipient, &text),
            HubCommand::Disconnect(player) => self.disconnect(player),
        }
        self.finish_disconnects();
    }

    pub fn submit_state(&mut self, bundle: StateBundle) {
        self.outbound.insert(bundle.sequence, bundle);
        while self.outbound.len() > self.config.retained_bundles.max(1) {
            self.outbound.pop_first();
        }
    }

    /// Broadcasts the submitted bundle for `sequence` to every Active connection.
    ///
    /// Recipients are fixed before the first send, so a connection failing
    /// mid-broadcast cannot change who gets this tick.
    pub fn send_state(&mut self, sequence: u64) {
        let Some(bundle) = self.outbound.get(&sequence) else {
            warn!("No state bundle submitted for sequence {}", sequence);
            return;
        };
        if !bundle.ready {
            debug!("State bundle {} not ready, holding broadcast", sequence);
            return;
        }
        if let Some(last) = self.last_broadcast {
            if sequence <= last {
                self.diagnostics.stale_broadcast();
                warn!(
                    "Refusing stale broadcast {} (last was {})",
                    sequence, last
                );
                return;
            }
        }

        let recipients = self.sessions.active();
        let mut snapshot = bundle.to_snapshot();
        snapshot.users = recipients.len() as u32;

        let record = match snapshot.to_bytes() {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to encode snapshot {}: {}", sequence, e);
                return;
            }
        };
        let Some(frame) = encode_outbound(&Packet::State { record }) else {
            return;
        };

        self.last_broadcast = Some(sequence);
        for handle in recipients {
            self.send_to(handle, &frame);
        }
        self.diagnostics.broadcast();
    }

    pub fn send_event(&mut self, player: PlayerRef, tag: u8, payload: &[u8]) {
        let Some(handle) = self.live_handle(player) else {
            warn!("Dropping event for {}: not connected", player);
            return;
        };

        let event = Packet::Event {
            tag,
            payload: payload.to_vec(),
        };
        if let Some(frame) = encode_outbound(&event) {
            self.send_to(handle, &frame);
        }
    }

    pub fn send_message(&mut self, recipient: Recipient, text: &str) {
        if text.len() > self.config.max_message_len {
            warn!(
                "Dropping {}-byte message over the {}-byte limit",
                text.len(),
                self.config.max_message_len
            );
            return;
        }

        let Some(frame) = encode_outbound(&Packet::Message {
            text: text.to_string(),
        }) else {
            return;
        };
        match recipient {
            Recipient::Player(player) => match self.live_handle(player) {
                Some(handle) => self.send_to(handle, &frame),
                None => warn!("Dropping message for {}: not connected", player),
            },
            Recipient::Broadcast => {
                for handle in self.sessions.active() {
                    self.send_to(handle, &frame);
                }
            }
        }
    }

    /// Kicks a player. Unknown or already departed players are ignored.
    pub fn disconnect(&mut self, player: PlayerRef) {
        match self.registry.reverse(player) {
            Some(handle) => self.begin_disconnect(handle, DisconnectReason::Kicked),
            None => debug!("Disconnect for {} ignored: not connected", player),
        }
    }

    fn live_handle(&self, player: PlayerRef) -> Option<ConnectionHandle> {
        let handle = self.registry.reverse(player)?;
        self.sessions
            .get(handle)
            .filter(|s| s.is_live())
            .map(|_| handle)
    }

    /// Best-effort send to a connection that is going away.
    fn notify(&mut self, handle: ConnectionHandle, packet: &Packet) {
        if let Some(frame) = encode_outbound(packet) {
            let _ = self.transport.send(handle, &frame);
        }
    }

    fn send_to(&mut self, handle: ConnectionHandle, frame: &[u8]) {
        if let Err(e) = self.transport.send(handle, frame) {
            error!("Failed to send to {}: {}", handle, e);
            self.begin_disconnect(handle, DisconnectReason::TransportError);
        }
    }

    /// Moves a connection to Disconnecting and queues the synthetic
    /// disconnect event. The registry entry goes in [`finish_disconnects`].
    fn begin_disconnect(&mut self, handle: ConnectionHandle, reason: DisconnectReason) {
        let Some(session) = self.sessions.get_mut(handle) else {
            return;
        };
        if !session.is_live() {
            return;
        }
        session.state = ConnectionState::Disconnecting;
        let player = session.player;
        info!("{} disconnecting: {:?}", handle, reason);

        if let Some(player) = player {
            let event = EventBundle {
                user_ref: player,
                tag: event_tag::DISCONNECTED,
                payload: vec![reason.code()],
            };
            if self.bundles.events.push(event).is_err() {
                debug!("Event list closed, disconnect of {} not queued", player);
            }
        }

        match reason {
            DisconnectReason::Requested | DisconnectReason::TransportError => {}
            DisconnectReason::Shutdown => {
                self.notify(handle, &Packet::Disconnect);
            }
            DisconnectReason::Timeout
            | DisconnectReason::ProtocolViolation
            | DisconnectReason::Kicked => {
                self.diagnostics.forced_disconnect();
                self.notify(handle, &Packet::Disconnect);
            }
        }

        self.closing.push(handle);
    }

    /// Disconnecting → Closed for everything queued by `begin_disconnect`.
    fn finish_disconnects(&mut self) {
        for handle in std::mem::take(&mut self.closing) {
            self.registry.on_disconnect(handle);
            self.transport.close(handle);
            self.sessions.remove(handle);
            debug!("{} closed", handle);
        }
    }

    fn housekeep(&mut self) {
        for handle in self.sessions.timed_out(self.config.client_timeout) {
            warn!("{} timed out", handle);
            self.begin_disconnect(handle, DisconnectReason::Timeout);
        }
        self.finish_disconnects();

        if !self.pending_states.is_empty()
            && self.pending_since.elapsed() >= self.config.state_flush_interval
        {
            self.flush_inbound();
        }

        self.housekeeping_passes += 1;
        if self.housekeeping_passes % SUMMARY_EVERY == 0 && !self.sessions.is_empty() {
            let stats = self.diagnostics.snapshot();
            debug!(
                "{} connections, {} players, {} active; {} packets, {} dropped malformed, {} broadcasts",
                self.sessions.len(),
                self.registry.len(),
                self.sessions.active_count(),
                stats.packets_received,
                stats.decode_errors,
                stats.broadcasts
            );
        }
    }

    fn shutdown(&mut self) {
        info!("Iris shutting down");
        self.running.store(false, Ordering::Release);

        // Nobody may be popping any more, so the last bundle must not wait
        if let Some(bundle) = self.close_inbound() {
            match self.bundles.states.try_push(bundle) {
                Ok(()) => self.next_inbound_sequence += 1,
                Err(e) => debug!("Dropping final inbound bundle: {}", e),
            }
        }

        let handles: HashSet<ConnectionHandle> = self.sessions.handles().into_iter().collect();
        for handle in handles {
            self.begin_disconnect(handle, DisconnectReason::Shutdown);
        }
        self.finish_disconnects();

        self.bundles.close_all();
    }
}

/// Encodes an outbound packet, logging the frame that cannot be sent.
fn encode_outbound(packet: &Packet) -> Option<Vec<u8>> {
    encode(packet)
        .map_err(|e| error!("Cannot encode {:?} packet: {}", packet.kind(), e))
        .ok()
}

/// Simulation-side interface to a running [`Iris`].
///
/// Cheap to clone and safe to use from any thread. Nothing here touches the
/// registry: sends are forwarded to the network loop.
#[derive(Clone)]
pub struct IrisHandle {
    bundles: Arc<Bundles>,
    diagnostics: Arc<Diagnostics>,
    running: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<HubCommand>,
    max_message_len: usize,
}

impl IrisHandle {
    /// Blocks until an inbound state bundle arrives or the hub shuts down.
    pub fn pop_state_bundle(&self) -> Result<StateBundle, QueueClosed> {
        self.bundles.states.pop()
    }

    pub fn pop_state_bundle_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<StateBundle>, QueueClosed> {
        self.bundles.states.pop_timeout(timeout)
    }

    pub fn drain_events(&self) -> Vec<EventBundle> {
        self.bundles.events.drain()
    }

    pub fn drain_messages(&self) -> Vec<MessageBundle> {
        self.bundles.messages.drain()
    }

    /// Stores an outbound bundle for a later [`send_state`](Self::send_state).
    pub fn submit_state(&self, bundle: StateBundle) -> Result<(), HubError> {
        self.command(HubCommand::SubmitState(bundle))
    }

    pub fn send_state(&self, sequence: u64) -> Result<(), HubError> {
        self.command(HubCommand::SendState(sequence))
    }

    /// Submits and broadcasts in one step.
    pub fn broadcast_state(&self, bundle: StateBundle) -> Result<(), HubError> {
        let sequence = bundle.sequence;
        self.submit_state(bundle)?;
        self.send_state(sequence)
    }

    pub fn send_event(&self, player: PlayerRef, tag: u8, payload: Vec<u8>) -> Result<(), HubError> {
        self.command(HubCommand::SendEvent {
            player,
            tag,
            payload,
        })
    }

    pub fn send_message(&self, recipient: Recipient, text: impl Into<String>) -> Result<(), HubError> {
        let text = text.into();
        if text.len() > self.max_message_len {
            return Err(HubError::MessageTooLong {
                len: text.len(),
                max: self.max_message_len,
            });
        }
        self.command(HubCommand::SendMessage { recipient, text })
    }

    pub fn disconnect(&self, player: PlayerRef) -> Result<(), HubError> {
        self.command(HubCommand::Disconnect(player))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the hub to stop; it notices within one poll interval.
    ///
    /// The state queue is closed here as well, so a network loop waiting for
    /// room in a bounded queue is released and can reach its own shutdown.
    /// Bundles already queued can still be popped.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.bundles.states.close();
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn command(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }
}
