//! Helpers for driving a client with scripted authoritative-peer traffic.

use bytes::Bytes;
use netsync_client::{
    client::ClosedReason,
    entity::{RemoteEntity, RemotePlayer},
    scene::SceneHost,
    SyncClient,
};
use netsync_shared::{
    catalog,
    config::SyncConfig,
    math::Vec2,
    protocol::{Immediate, InitInfo, Message, Packet, TerrainEvent, TickFrame, PROTOCOL_VERSION},
    registry::{ClassRegistry, EntityId},
    value::WireValue,
};

/// Remote tick rate used by the scripts.
pub const TICK_RATE: u8 = 20;
/// Remote wall clock at the handshake reference tick.
pub const REFERENCE_TIME_MS: i64 = 1_700_000_000_000;
pub const REFERENCE_TICK: u16 = 100;
pub const LOCAL_PLAYER: u8 = 1;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Everything the client reported to its scene.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    Created(EntityId),
    Destroyed(EntityId),
    Interpolated(EntityId),
    Joined(u8),
    Left(u8),
    Moved(u8, Vec2),
    RoundStarted(u16),
    RoundEnded(Option<u8>),
    Terrain(TerrainEvent),
    Closed(ClosedReason),
}

#[derive(Debug, Default)]
pub struct RecordingScene {
    pub events: Vec<SceneEvent>,
}

impl RecordingScene {
    pub fn count(&self, pred: impl Fn(&SceneEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl SceneHost for RecordingScene {
    fn entity_created(&mut self, entity: &RemoteEntity) {
        self.events.push(SceneEvent::Created(entity.id()));
    }
    fn entity_destroyed(&mut self, id: EntityId) {
        self.events.push(SceneEvent::Destroyed(id));
    }
    fn entity_interpolated(&mut self, entity: &RemoteEntity) {
        self.events.push(SceneEvent::Interpolated(entity.id()));
    }
    fn player_joined(&mut self, player: &RemotePlayer) {
        self.events.push(SceneEvent::Joined(player.id()));
    }
    fn player_left(&mut self, id: u8) {
        self.events.push(SceneEvent::Left(id));
    }
    fn player_moved(&mut self, player: &RemotePlayer) {
        self.events
            .push(SceneEvent::Moved(player.id(), player.position()));
    }
    fn round_started(&mut self, round: u16, _seed: u32) {
        self.events.push(SceneEvent::RoundStarted(round));
    }
    fn round_ended(&mut self, winner: Option<u8>) {
        self.events.push(SceneEvent::RoundEnded(winner));
    }
    fn terrain_event(&mut self, event: TerrainEvent) {
        self.events.push(SceneEvent::Terrain(event));
    }
    fn connection_closed(&mut self, reason: &ClosedReason) {
        self.events.push(SceneEvent::Closed(reason.clone()));
    }
}

/// Builds the bytes an authoritative peer would send.
#[derive(Debug, Clone)]
pub struct ScriptedPeer {
    registry: ClassRegistry,
}

impl ScriptedPeer {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            registry: catalog::registry()?,
        })
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn init_with_version(&self, version: u64) -> anyhow::Result<Bytes> {
        Ok(Immediate::Init(InitInfo {
            version,
            tick_rate: TICK_RATE,
            reference_time_ms: REFERENCE_TIME_MS,
            reference_tick: REFERENCE_TICK,
            player_id: LOCAL_PLAYER,
        })
        .to_bytes()?)
    }

    pub fn init(&self) -> anyhow::Result<Bytes> {
        self.init_with_version(PROTOCOL_VERSION)
    }

    pub fn frame(&self, tick: u16, messages: Vec<Message>) -> anyhow::Result<Bytes> {
        Ok(Packet::Queue(TickFrame { tick, messages }).encode(&self.registry)?)
    }

    /// Update message for `class` with named fields overriding the defaults.
    pub fn update(
        &self,
        class: &str,
        entity: u32,
        fields: &[(&str, WireValue)],
    ) -> anyhow::Result<Message> {
        let registration = self
            .registry
            .by_name(class)
            .ok_or_else(|| anyhow::anyhow!("unknown class {class}"))?;
        let mut values = registration.spawn_defaults();
        for (name, value) in fields {
            let slot = registration
                .slot_of(name)
                .ok_or_else(|| anyhow::anyhow!("{class} has no variable {name}"))?;
            values[slot] = *value;
        }
        Ok(Message::EntityUpdate {
            class: registration.id(),
            entity: EntityId(entity),
            values,
        })
    }

    pub fn create(&self, class: &str, entity: u32) -> anyhow::Result<Message> {
        let class = self
            .registry
            .id_of(class)
            .ok_or_else(|| anyhow::anyhow!("unknown class {class}"))?;
        Ok(Message::EntityCreate {
            class,
            entity: EntityId(entity),
        })
    }

    pub fn delete(&self, class: &str, entity: u32) -> anyhow::Result<Message> {
        let class = self
            .registry
            .id_of(class)
            .ok_or_else(|| anyhow::anyhow!("unknown class {class}"))?;
        Ok(Message::EntityDelete {
            class,
            entity: EntityId(entity),
        })
    }
}

/// Local time at which the client renders exactly `frame`, assuming no pong
/// has been processed yet (ping 1, clock delta 0).
pub fn local_time_for_frame(frame: f64, dejitter_ms: f64) -> i64 {
    let elapsed_ms = (frame + 1.0 - f64::from(REFERENCE_TICK)) * 1000.0 / f64::from(TICK_RATE);
    REFERENCE_TIME_MS + elapsed_ms.round() as i64 + 1 + dejitter_ms.round() as i64
}

/// A client with the shipped catalog, already past the handshake.
pub fn connected_client(
    peer: &ScriptedPeer,
    config: SyncConfig,
) -> anyhow::Result<SyncClient<RecordingScene>> {
    let mut client = SyncClient::new(config, peer.registry().clone(), RecordingScene::default());
    client.receive(peer.init()?, REFERENCE_TIME_MS)?;
    Ok(client)
}
