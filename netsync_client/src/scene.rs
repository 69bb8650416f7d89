//! Scene collaborator.
//!
//! The synchronization core does not render anything. It reports entity and
//! player lifecycle, interpolated state and world events to whatever owns the
//! scene through this trait.

use netsync_shared::{protocol::TerrainEvent, registry::EntityId};

use crate::{
    client::ClosedReason,
    entity::{RemoteEntity, RemotePlayer},
};

pub trait SceneHost {
    fn entity_created(&mut self, entity: &RemoteEntity);
    fn entity_destroyed(&mut self, id: EntityId);
    /// Called after interpolated fields of `entity` were refreshed.
    fn entity_interpolated(&mut self, entity: &RemoteEntity);
    fn player_joined(&mut self, player: &RemotePlayer);
    fn player_left(&mut self, id: u8);
    fn player_moved(&mut self, player: &RemotePlayer);
    fn round_started(&mut self, round: u16, seed: u32);
    fn round_ended(&mut self, winner: Option<u8>);
    fn terrain_event(&mut self, event: TerrainEvent);
    fn connection_closed(&mut self, reason: &ClosedReason);
}

/// A scene that ignores everything. Useful for headless tests.
#[derive(Debug, Default)]
pub struct NullScene;

impl SceneHost for NullScene {
    fn entity_created(&mut self, _entity: &RemoteEntity) {}
    fn entity_destroyed(&mut self, _id: EntityId) {}
    fn entity_interpolated(&mut self, _entity: &RemoteEntity) {}
    fn player_joined(&mut self, _player: &RemotePlayer) {}
    fn player_left(&mut self, _id: u8) {}
    fn player_moved(&mut self, _player: &RemotePlayer) {}
    fn round_started(&mut self, _round: u16, _seed: u32) {}
    fn round_ended(&mut self, _winner: Option<u8>) {}
    fn terrain_event(&mut self, _event: TerrainEvent) {}
    fn connection_closed(&mut self, _reason: &ClosedReason) {}
}
