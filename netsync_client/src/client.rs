//! Client implementation.
//!
//! [`SyncClient`] is the per-frame entry point of the synchronization layer.
//! It is transport-agnostic: the host feeds it whole inbound messages with
//! [`SyncClient::receive`], calls [`SyncClient::update`] once per local frame,
//! and ships whatever [`SyncClient::take_outbound`] returns.
//!
//! Everything runs on the caller's thread. Inbound queue frames are decoded
//! on arrival but only applied inside `update`, in arrival order.

use std::{
    collections::{BTreeMap, VecDeque},
    num::NonZeroUsize,
};

use bytes::Bytes;
use netsync_shared::{
    codec::CodecError,
    config::SyncConfig,
    event::EventBus,
    protocol::{Immediate, InitInfo, Message, Packet, ProtocolError, TickFrame, PROTOCOL_VERSION},
    registry::{ClassId, ClassRegistry, EntityId, RegistryError},
};
use tracing::{debug, error, info, warn};

use crate::{
    clock::{ClockSync, PingUpdate},
    entity::{RemoteEntity, RemotePlayer},
    input::{build_command, InputState},
    rpc::{RpcOutcome, RpcRouter},
    scene::SceneHost,
    tick::{TickEstimator, TickUnwrapper, ZeroTickRate},
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("protocol version mismatch: local {local:#018x}, remote {remote:#018x}")]
    VersionMismatch { local: u64, remote: u64 },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    ZeroTickRate(#[from] ZeroTickRate),
    #[error("entity {0:?} created twice")]
    DuplicateEntity(EntityId),
    #[error("entity {entity:?} is a {existing:?}, message addressed it as {addressed:?}")]
    ClassMismatch {
        entity: EntityId,
        existing: ClassId,
        addressed: ClassId,
    },
    #[error("rpc {name}: {source}")]
    Rpc { name: String, source: CodecError },
    #[error("{queued} frames waiting to be applied, limit {limit}")]
    Backlog { queued: usize, limit: usize },
}

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosedReason {
    VersionMismatch,
    /// Undecodable or inconsistent data from the remote.
    Protocol,
    DuplicateEntity,
    /// More frames arrived than the client could hold before applying them.
    Backlog,
    /// The remote sent a disconnect.
    Remote(String),
    ConnectionLost,
}

impl From<&SyncError> for ClosedReason {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::VersionMismatch { .. } => ClosedReason::VersionMismatch,
            SyncError::DuplicateEntity(_) => ClosedReason::DuplicateEntity,
            SyncError::Backlog { .. } => ClosedReason::Backlog,
            _ => ClosedReason::Protocol,
        }
    }
}

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is up, handshake not received yet.
    AwaitingInit,
    Connected,
    Closed(ClosedReason),
}

/// Counters for everything the loop absorbs instead of failing on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub frames_applied: u64,
    pub messages_applied: u64,
    pub entities_created: u64,
    pub entities_destroyed: u64,
    /// Entities created because an update referenced an unknown id.
    pub entities_healed: u64,
    /// Deletes for ids that were not live.
    pub ignored_deletes: u64,
    pub missing_samples: u64,
    pub unknown_rpcs: u64,
    pub probes_sent: u64,
    pub pongs_received: u64,
    /// Pongs whose timestamps could not be combined with the local clock.
    pub pongs_rejected: u64,
}

pub struct SyncClient<H: SceneHost> {
    config: SyncConfig,
    registry: ClassRegistry,
    host: H,
    state: ConnectionState,

    clock: ClockSync,
    estimator: Option<TickEstimator>,
    ticks: TickUnwrapper,
    local_player: Option<u8>,
    render_frame: Option<f64>,

    queue: VecDeque<TickFrame>,
    entities: BTreeMap<EntityId, RemoteEntity>,
    players: BTreeMap<u8, RemotePlayer>,

    rpc: RpcRouter,
    events: EventBus,
    outbox: Vec<Bytes>,
    stats: SyncStats,
}

impl<H: SceneHost> SyncClient<H> {
    pub fn new(config: SyncConfig, registry: ClassRegistry, host: H) -> Self {
        let clock = ClockSync::new(config.ping_interval_ms, config.ping_hysteresis_ms);
        Self {
            config,
            registry,
            host,
            state: ConnectionState::AwaitingInit,
            clock,
            estimator: None,
            ticks: TickUnwrapper::default(),
            local_player: None,
            render_frame: None,
            queue: VecDeque::new(),
            entities: BTreeMap::new(),
            players: BTreeMap::new(),
            rpc: RpcRouter::new(),
            events: EventBus::default(),
            outbox: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn closed_reason(&self) -> Option<&ClosedReason> {
        match &self.state {
            ConnectionState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn rpc_mut(&mut self) -> &mut RpcRouter {
        &mut self.rpc
    }

    /// Id the remote assigned to the local player.
    pub fn local_player(&self) -> Option<u8> {
        self.local_player
    }

    /// Fractional frame used by the last interpolation pass.
    pub fn render_frame(&self) -> Option<f64> {
        self.render_frame
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn entity(&self, id: EntityId) -> Option<&RemoteEntity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub fn player(&self, id: u8) -> Option<&RemotePlayer> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    /// Drains events published by variable reactions.
    ///
    /// Each event type keeps at most [`EventBus::DEFAULT_LIMIT`] undrained
    /// events; older ones are dropped first.
    pub fn drain_events<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.events.drain::<E>()
    }

    /// Messages waiting to be written to the transport, oldest first.
    pub fn take_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    /// Handles one inbound top-level message.
    ///
    /// Decode failures close the connection and are returned, as does a
    /// queue frame that would push the backlog past `max_queued_frames`.
    /// Messages that arrive after the connection closed are dropped.
    pub fn receive(&mut self, bytes: impl Into<Bytes>, now_ms: i64) -> Result<(), SyncError> {
        if let ConnectionState::Closed(reason) = &self.state {
            debug!(?reason, "Dropping message on closed connection");
            return Ok(());
        }
        let packet = match Packet::decode(bytes, &self.registry) {
            Ok(packet) => packet,
            Err(e) => return Err(self.fail(e.into())),
        };
        match packet {
            Packet::Immediate(msg) => match self.handle_immediate(msg, now_ms) {
                Err(e) => Err(self.fail(e)),
                ok => ok,
            },
            Packet::Queue(frame) => {
                let limit = self.config.max_queued_frames;
                if self.queue.len() >= limit {
                    warn!(tick = frame.tick, limit, state = ?self.state, "Frame queue full");
                    let queued = self.queue.len() + 1;
                    return Err(self.fail(SyncError::Backlog { queued, limit }));
                }
                self.queue.push_back(frame);
                Ok(())
            }
        }
    }

    fn handle_immediate(&mut self, msg: Immediate, now_ms: i64) -> Result<(), SyncError> {
        match msg {
            Immediate::Init(info) => self.handle_init(info),
            Immediate::Ping { sent_at_ms } => {
                let pong = Immediate::Pong {
                    original_ms: sent_at_ms,
                    remote_ms: now_ms,
                };
                self.outbox.push(pong.to_bytes()?);
                Ok(())
            }
            Immediate::Pong {
                original_ms,
                remote_ms,
            } => {
                self.stats.pongs_received += 1;
                match self.clock.on_pong(now_ms, original_ms, remote_ms) {
                    Ok(PingUpdate::Accepted { previous, ping_ms }) => {
                        info!(previous, ping = ping_ms, "Ping estimate updated");
                    }
                    Ok(PingUpdate::Unchanged { .. }) => {}
                    Err(e) => {
                        warn!(error = %e, "Discarding pong");
                        self.stats.pongs_rejected += 1;
                    }
                }
                Ok(())
            }
            Immediate::Input(cmd) => {
                warn!(tick = cmd.tick, "Ignoring input message from remote");
                Ok(())
            }
            Immediate::Disconnect { reason } => {
                info!(reason = %reason, "Remote closed the connection");
                self.close(ClosedReason::Remote(reason));
                Ok(())
            }
        }
    }

    fn handle_init(&mut self, info: InitInfo) -> Result<(), SyncError> {
        if self.state != ConnectionState::AwaitingInit {
            warn!("Ignoring repeated handshake");
            return Ok(());
        }
        if info.version != PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: info.version,
            });
        }
        let reference_frame = self.ticks.seed(info.reference_tick);
        self.estimator = Some(TickEstimator::from_init(
            &info,
            reference_frame,
            self.config.dejitter_ms,
        )?);
        self.local_player = Some(info.player_id);
        self.state = ConnectionState::Connected;
        info!(
            player = info.player_id,
            tick_rate = info.tick_rate,
            reference_tick = info.reference_tick,
            "Handshake complete"
        );
        Ok(())
    }

    /// Advances the client by one local frame.
    ///
    /// Sends a clock probe when one is due, applies queued frames in arrival
    /// order and refreshes every interpolated value for the current render
    /// frame. Does nothing before the handshake or after close.
    pub fn update(&mut self, now_ms: i64) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Ok(());
        }

        if self.clock.probe_due(now_ms) {
            let sent_at_ms = self.clock.start_probe(now_ms);
            match (Immediate::Ping { sent_at_ms }).to_bytes() {
                Ok(ping) => self.outbox.push(ping),
                Err(e) => return Err(self.fail(e.into())),
            }
            self.stats.probes_sent += 1;
        }

        if let Err(e) = self.drain_frames() {
            return Err(self.fail(e));
        }
        if !self.is_connected() {
            return Ok(());
        }

        let Some(estimator) = self.estimator else {
            return Ok(());
        };
        let frame = estimator.fractional_tick(now_ms, &self.clock);
        self.interpolate(frame);
        Ok(())
    }

    fn drain_frames(&mut self) -> Result<(), SyncError> {
        let budget = self
            .config
            .max_frames_per_update
            .map_or(usize::MAX, NonZeroUsize::get);
        let mut applied = 0;
        while applied < budget {
            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            let number = self.ticks.unwrap(frame.tick);
            for msg in frame.messages {
                self.apply_message(number, msg)?;
                self.stats.messages_applied += 1;
            }
            self.stats.frames_applied += 1;
            applied += 1;
        }
        if !self.queue.is_empty() {
            debug!(backlog = self.queue.len(), "Frame budget exhausted");
        }
        Ok(())
    }

    fn apply_message(&mut self, frame: u32, msg: Message) -> Result<(), SyncError> {
        match msg {
            Message::EntityCreate { class, entity } => {
                if self.entities.contains_key(&entity) {
                    return Err(SyncError::DuplicateEntity(entity));
                }
                let spawned = self.spawn(class, entity)?;
                debug!(entity = entity.0, class = class.0, frame, "Entity created");
                self.host.entity_created(&spawned);
                self.entities.insert(entity, spawned);
            }
            Message::EntityUpdate {
                class,
                entity,
                values,
            } => {
                if !self.entities.contains_key(&entity) {
                    warn!(entity = entity.0, class = class.0, "Update for unknown entity, creating it");
                    let spawned = self.spawn(class, entity)?;
                    self.host.entity_created(&spawned);
                    self.entities.insert(entity, spawned);
                    self.stats.entities_healed += 1;
                }
                let Some(target) = self.entities.get_mut(&entity) else {
                    return Ok(());
                };
                if target.class() != class {
                    return Err(SyncError::ClassMismatch {
                        entity,
                        existing: target.class(),
                        addressed: class,
                    });
                }
                self.registry
                    .apply(class, frame, &values, target, &mut self.events)?;
            }
            Message::EntityDelete { class, entity } => {
                match self.entities.get(&entity).map(RemoteEntity::class) {
                    Some(existing) if existing != class => {
                        return Err(SyncError::ClassMismatch {
                            entity,
                            existing,
                            addressed: class,
                        });
                    }
                    Some(_) => {
                        self.entities.remove(&entity);
                        debug!(entity = entity.0, frame, "Entity deleted");
                        self.host.entity_destroyed(entity);
                        self.stats.entities_destroyed += 1;
                    }
                    None => {
                        warn!(entity = entity.0, class = class.0, "Delete for unknown entity");
                        self.stats.ignored_deletes += 1;
                    }
                }
            }
            Message::PlayerJoin { player, name } => {
                info!(player, name = %name, "Player joined");
                let joined = RemotePlayer::new(player, name, self.config.interpolation_horizon_ticks);
                self.host.player_joined(&joined);
                if self.players.insert(player, joined).is_some() {
                    warn!(player, "Player joined twice, replaced");
                }
            }
            Message::PlayerLeave { player } => {
                if self.players.remove(&player).is_some() {
                    info!(player, "Player left");
                    self.host.player_left(player);
                } else {
                    debug!(player, "Leave for unknown player");
                }
            }
            Message::PlayerMove { player, position } => match self.players.get_mut(&player) {
                Some(p) => p.push_position(frame, position),
                None => debug!(player, "Move for unknown player"),
            },
            Message::RoundStart { round, seed } => {
                info!(round, seed, "Round started");
                self.host.round_started(round, seed);
            }
            Message::RoundEnd { winner } => {
                info!(?winner, entities = self.entities.len(), "Round ended");
                self.teardown();
                self.host.round_ended(winner);
            }
            Message::Rpc { name, payload } => match self.rpc.dispatch(&name, payload) {
                Ok(RpcOutcome::Handled) => {}
                Ok(RpcOutcome::Unknown) => {
                    warn!(rpc = %name, "No handler for RPC");
                    self.stats.unknown_rpcs += 1;
                }
                Err(source) => return Err(SyncError::Rpc { name, source }),
            },
            Message::Terrain(event) => self.host.terrain_event(event),
        }
        Ok(())
    }

    fn spawn(&self, class: ClassId, entity: EntityId) -> Result<RemoteEntity, SyncError> {
        let registration = self.registry.get(class)?;
        Ok(RemoteEntity::spawn(
            entity,
            registration,
            self.config.interpolation_horizon_ticks,
        ))
    }

    fn interpolate(&mut self, frame: f64) {
        self.render_frame = Some(frame);
        // keep one frame of slack behind the render frame
        let cutoff = (frame.max(1.0).floor() as u32).saturating_sub(1);

        for entity in self.entities.values_mut() {
            if !entity.has_interpolated() {
                continue;
            }
            let pass = entity.interpolate(frame);
            if pass.missing > 0 {
                debug!(entity = entity.id().0, missing = pass.missing, frame, "Missing interpolation samples");
                self.stats.missing_samples += pass.missing as u64;
            }
            if pass.applied > 0 {
                self.host.entity_interpolated(entity);
            }
            entity.evict_before(cutoff);
        }

        for player in self.players.values_mut() {
            if !player.has_samples() {
                continue;
            }
            if player.interpolate(frame).is_some() {
                self.host.player_moved(player);
            } else {
                self.stats.missing_samples += 1;
            }
            player.evict_before(cutoff);
        }
    }

    /// Queues the local player's input for the newest remote tick.
    pub fn send_input(&mut self, input: InputState) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Ok(());
        }
        let Some(frame) = self.ticks.latest() else {
            return Ok(());
        };
        // wire ticks are the low 16 bits of the frame
        let msg = Immediate::Input(build_command(frame as u16, input));
        self.outbox.push(msg.to_bytes()?);
        Ok(())
    }

    /// Tears the session down after the transport dropped.
    pub fn disconnect(&mut self, reason: &str) {
        if matches!(self.state, ConnectionState::Closed(_)) {
            return;
        }
        info!(reason, "Connection lost");
        self.close(ClosedReason::ConnectionLost);
    }

    fn fail(&mut self, err: SyncError) -> SyncError {
        error!(error = %err, "Closing connection");
        self.close(ClosedReason::from(&err));
        err
    }

    fn close(&mut self, reason: ClosedReason) {
        self.queue.clear();
        self.teardown();
        self.clock.reset();
        self.ticks.reset();
        self.estimator = None;
        self.render_frame = None;
        self.outbox.clear();
        self.host.connection_closed(&reason);
        self.state = ConnectionState::Closed(reason);
    }

    /// Destroys every remotely owned entity and player.
    fn teardown(&mut self) {
        for id in std::mem::take(&mut self.entities).into_keys() {
            self.host.entity_destroyed(id);
            self.stats.entities_destroyed += 1;
        }
        for id in std::mem::take(&mut self.players).into_keys() {
            self.host.player_left(id);
        }
    }
}

impl<H: SceneHost> std::fmt::Debug for SyncClient<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("state", &self.state)
            .field("entities", &self.entities.len())
            .field("players", &self.players.len())
            .field("queued", &self.queue.len())
            .field("stats", &self.stats)
            .finish()
    }
}
