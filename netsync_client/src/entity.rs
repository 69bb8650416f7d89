//! Remote entity and player state.
//!
//! A [`RemoteEntity`] holds one value per class variable (slot order) plus an
//! interpolation buffer for every interpolated slot. The registry writes into
//! it through [`ReplicatedState`]; the dispatch loop reads reconstructed
//! values back out once per update.

use netsync_shared::{
    math::Vec2,
    registry::{ClassId, ClassRegistration, EntityId, ReplicatedState},
    value::WireValue,
};
use tracing::trace;

use crate::interp::InterpolationBuffer;

/// Result of one interpolation pass over an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpolationPass {
    /// Slots that received a value this pass.
    pub applied: usize,
    /// Slots with samples but no bracket around the render frame.
    pub missing: usize,
}

#[derive(Debug, Clone)]
pub struct RemoteEntity {
    id: EntityId,
    class: ClassId,
    fields: Vec<WireValue>,
    tracks: Vec<Option<InterpolationBuffer<WireValue>>>,
}

impl RemoteEntity {
    /// Instantiates an entity with the class's default field values.
    pub fn spawn(id: EntityId, class: &ClassRegistration, horizon: u32) -> Self {
        let tracks = class
            .variables()
            .iter()
            .map(|v| v.interpolated.then(|| InterpolationBuffer::new(horizon)))
            .collect();
        Self {
            id,
            class: class.id(),
            fields: class.spawn_defaults(),
            tracks,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Current value of every slot.
    pub fn values(&self) -> &[WireValue] {
        &self.fields
    }

    pub fn value(&self, slot: usize) -> Option<&WireValue> {
        self.fields.get(slot)
    }

    /// Looks a field up by variable name.
    pub fn field(&self, class: &ClassRegistration, name: &str) -> Option<&WireValue> {
        class.slot_of(name).and_then(|slot| self.value(slot))
    }

    pub fn track(&self, slot: usize) -> Option<&InterpolationBuffer<WireValue>> {
        self.tracks.get(slot).and_then(Option::as_ref)
    }

    pub fn has_interpolated(&self) -> bool {
        self.tracks.iter().any(Option::is_some)
    }

    /// Writes the value at `frame` into every interpolated slot.
    ///
    /// A slot without both brackets holds its newest sample at or before
    /// `frame` and counts as missing.
    pub fn interpolate(&mut self, frame: f64) -> InterpolationPass {
        let mut pass = InterpolationPass::default();
        let floor = frame.max(0.0).floor() as u32;
        for (slot, track) in self.tracks.iter().enumerate() {
            let Some(track) = track else { continue };
            if track.is_empty() {
                continue;
            }
            if let Some(value) = track.get_value(frame) {
                self.fields[slot] = value;
                pass.applied += 1;
                continue;
            }
            pass.missing += 1;
            if let Some((held, value)) = track.latest_at_or_before(floor) {
                trace!(entity = self.id.0, slot, held, frame, "Holding last sample");
                self.fields[slot] = *value;
                pass.applied += 1;
            }
        }
        pass
    }

    pub fn evict_before(&mut self, frame: u32) {
        for track in self.tracks.iter_mut().flatten() {
            track.evict_before(frame);
        }
    }
}

impl ReplicatedState for RemoteEntity {
    fn network_id(&self) -> EntityId {
        self.id
    }

    fn push_sample(&mut self, slot: usize, frame: u32, value: WireValue) {
        match self.tracks.get_mut(slot) {
            Some(Some(track)) => {
                track.add_value(frame, value);
            }
            _ => self.assign(slot, value),
        }
    }

    fn assign(&mut self, slot: usize, value: WireValue) {
        if let Some(field) = self.fields.get_mut(slot) {
            *field = value;
        }
    }
}

/// A remote player, tracked by its one-byte id.
#[derive(Debug, Clone)]
pub struct RemotePlayer {
    id: u8,
    name: String,
    position: Vec2,
    track: InterpolationBuffer<Vec2>,
}

impl RemotePlayer {
    pub fn new(id: u8, name: impl Into<String>, horizon: u32) -> Self {
        Self {
            id,
            name: name.into(),
            position: Vec2::ZERO,
            track: InterpolationBuffer::new(horizon),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last rendered position.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn push_position(&mut self, frame: u32, position: Vec2) {
        self.track.add_value(frame, position);
    }

    /// Updates the rendered position. `None` when no bracket exists.
    pub fn interpolate(&mut self, frame: f64) -> Option<Vec2> {
        let position = self.track.get_value(frame).or_else(|| {
            let floor = frame.max(0.0).floor() as u32;
            self.track.latest_at_or_before(floor).map(|(_, p)| *p)
        })?;
        self.position = position;
        Some(position)
    }

    pub fn has_samples(&self) -> bool {
        !self.track.is_empty()
    }

    pub fn evict_before(&mut self, frame: u32) {
        self.track.evict_before(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_shared::{catalog, event::EventBus};

    #[test]
    fn spawn_uses_class_defaults() {
        let reg = catalog::registry().unwrap();
        let mine = reg.by_name("Mine").unwrap();
        let entity = RemoteEntity::spawn(EntityId(3), mine, 64);
        assert_eq!(entity.class(), mine.id());
        assert_eq!(entity.field(mine, "hp"), Some(&WireValue::I16(100)));
        assert_eq!(entity.field(mine, "armed"), Some(&WireValue::Bool(false)));
        assert!(entity.track(mine.slot_of("position").unwrap()).is_some());
        assert!(entity.track(mine.slot_of("hp").unwrap()).is_none());
    }

    #[test]
    fn samples_feed_interpolation() {
        let reg = catalog::registry().unwrap();
        let barrel = reg.by_name("Barrel").unwrap();
        let mut entity = RemoteEntity::spawn(EntityId(1), barrel, 64);
        let mut events = EventBus::default();

        for (frame, x) in [(10, 0.0), (11, 10.0)] {
            reg.apply(
                barrel.id(),
                frame,
                &[WireValue::U8(40), WireValue::Vec2(Vec2::new(x, x))],
                &mut entity,
                &mut events,
            )
            .unwrap();
        }

        let pass = entity.interpolate(10.25);
        assert_eq!(pass, InterpolationPass { applied: 1, missing: 0 });
        assert_eq!(
            entity.field(barrel, "position"),
            Some(&WireValue::Vec2(Vec2::new(2.5, 2.5)))
        );
    }

    #[test]
    fn missing_bracket_holds_last_sample() {
        let reg = catalog::registry().unwrap();
        let barrel = reg.by_name("Barrel").unwrap();
        let slot = barrel.slot_of("position").unwrap();
        let mut entity = RemoteEntity::spawn(EntityId(1), barrel, 64);
        entity.push_sample(slot, 10, WireValue::Vec2(Vec2::new(4.0, 4.0)));

        let pass = entity.interpolate(12.5);
        assert_eq!(pass, InterpolationPass { applied: 1, missing: 1 });
        assert_eq!(entity.value(slot), Some(&WireValue::Vec2(Vec2::new(4.0, 4.0))));

        // nothing at or before frame 8 yet
        let mut early = RemoteEntity::spawn(EntityId(2), barrel, 64);
        early.push_sample(slot, 10, WireValue::Vec2(Vec2::new(4.0, 4.0)));
        let pass = early.interpolate(8.5);
        assert_eq!(pass, InterpolationPass { applied: 0, missing: 1 });
        assert_eq!(early.value(slot), Some(&WireValue::Vec2(Vec2::ZERO)));

        entity.evict_before(11);
        assert_eq!(entity.interpolate(12.5), InterpolationPass::default());
    }

    #[test]
    fn player_position_interpolates() {
        let mut player = RemotePlayer::new(2, "worm", 64);
        assert!(!player.has_samples());
        assert_eq!(player.interpolate(4.5), None);

        player.push_position(4, Vec2::new(0.0, 2.0));
        player.push_position(5, Vec2::new(4.0, 2.0));
        assert_eq!(player.interpolate(4.5), Some(Vec2::new(2.0, 2.0)));
        assert_eq!(player.position(), Vec2::new(2.0, 2.0));
        assert_eq!(player.name(), "worm");
    }
}
