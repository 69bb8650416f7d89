//! Networked class declarations.
//!
//! The authoritative peer declares the same classes with the same variables.
//! Adding a class means giving it the id it will get after sorting by name,
//! and shifting the ids of every class that sorts after it on both peers.

use crate::{
    event::EventBus,
    registry::{ClassDescriptor, ClassRegistry, EntityId, RegistryError, VariableDescriptor},
    value::{WireType, WireValue},
};

/// Published when a mine reports being armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MineArmed {
    pub entity: EntityId,
}

fn mine_armed(entity: EntityId, value: &WireValue, events: &mut EventBus) {
    if value.as_bool() == Some(true) {
        events.push(MineArmed { entity });
    }
}

/// All networked classes, in no particular order.
pub fn classes() -> Vec<ClassDescriptor> {
    vec![
        ClassDescriptor::new("Barrel", 0)
            .var(VariableDescriptor::new("hp", WireType::U8).with_default(WireValue::U8(40)))
            .var(VariableDescriptor::new("position", WireType::Vec2).interpolated()),
        ClassDescriptor::new("Grenade", 1)
            .var(VariableDescriptor::new("fuse", WireType::F32).with_default(WireValue::F32(3.0)))
            .var(VariableDescriptor::new("position", WireType::Vec2).interpolated())
            .var(VariableDescriptor::new("rotation", WireType::F32).interpolated()),
        ClassDescriptor::new("Mine", 2)
            .var(VariableDescriptor::new("armed", WireType::Bool).on_change(mine_armed))
            .var(VariableDescriptor::new("hp", WireType::I16).with_default(WireValue::I16(100)))
            .var(VariableDescriptor::new("position", WireType::Vec2).interpolated()),
    ]
}

/// Registry built from [`classes`].
pub fn registry() -> Result<ClassRegistry, RegistryError> {
    ClassRegistry::init(classes())
}
