//! Remote entity registry.
//!
//! Maps networked class names to the small integer IDs used on the wire and
//! fixes the order in which each class's variables are encoded. Both peers
//! build this table independently from the same declarations, so the
//! assignment must be identical on both sides:
//!
//! - classes are sorted by name and numbered `0..N`,
//! - within a class, variables are sorted by name; that order is the wire
//!   order and each variable's position is its slot.
//!
//! A class whose computed ID differs from the ID it declares means the two
//! peers disagree about the schema. [`ClassRegistry::init`] refuses to start
//! in that case.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    codec::{CodecError, PacketReader, PacketWriter},
    event::EventBus,
    value::{WireType, WireValue},
};

/// Network-assigned entity id, unique per connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

/// Shared class id derived from the sorted class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u8);

/// One-shot side effect run whenever a variable value is decoded.
pub type Reaction = fn(EntityId, &WireValue, &mut EventBus);

/// Maximum number of classes addressable by a `u8` class id.
pub const MAX_CLASSES: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("class {class}: declared id {expected}, computed id {computed}")]
    IdMismatch {
        class: String,
        expected: u8,
        computed: usize,
    },
    #[error("class {0} declared twice")]
    DuplicateClass(String),
    #[error("class {class}: variable {variable} declared twice")]
    DuplicateVariable { class: String, variable: String },
    #[error("{0} classes declared, at most {MAX_CLASSES} fit a u8 id")]
    TooManyClasses(usize),
    #[error("class {class}: variable {variable} of type {wire:?} cannot be interpolated")]
    NotInterpolable {
        class: String,
        variable: String,
        wire: WireType,
    },
    #[error("class {class}: variable {variable} default is {found:?}, declared {wire:?}")]
    DefaultTypeMismatch {
        class: String,
        variable: String,
        wire: WireType,
        found: WireType,
    },
    #[error("unregistered class id {0}")]
    UnknownClass(u8),
    #[error("class {class}: expected {expected} values, got {got}")]
    ValueCount {
        class: String,
        expected: usize,
        got: usize,
    },
    #[error("class {class}: variable {variable} expects {wire:?}, got {found:?}")]
    ValueType {
        class: String,
        variable: String,
        wire: WireType,
        found: WireType,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A networked field of a class.
#[derive(Clone)]
pub struct VariableDescriptor {
    pub name: &'static str,
    pub wire: WireType,
    pub interpolated: bool,
    pub default: WireValue,
    pub reaction: Option<Reaction>,
}

impl VariableDescriptor {
    pub fn new(name: &'static str, wire: WireType) -> Self {
        Self {
            name,
            wire,
            interpolated: false,
            default: WireValue::default_for(wire),
            reaction: None,
        }
    }

    /// Route decoded values through an interpolation buffer.
    pub fn interpolated(mut self) -> Self {
        self.interpolated = true;
        self
    }

    pub fn with_default(mut self, value: WireValue) -> Self {
        self.default = value;
        self
    }

    pub fn on_change(mut self, reaction: Reaction) -> Self {
        self.reaction = Some(reaction);
        self
    }
}

impl fmt::Debug for VariableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableDescriptor")
            .field("name", &self.name)
            .field("wire", &self.wire)
            .field("interpolated", &self.interpolated)
            .field("default", &self.default)
            .field("reaction", &self.reaction.is_some())
            .finish()
    }
}

/// A statically declared networked class, before registration.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub name: &'static str,
    /// Id both peers expect this class to receive.
    pub expected_id: u8,
    pub variables: Vec<VariableDescriptor>,
}

impl ClassDescriptor {
    pub fn new(name: &'static str, expected_id: u8) -> Self {
        Self {
            name,
            expected_id,
            variables: Vec::new(),
        }
    }

    pub fn var(mut self, variable: VariableDescriptor) -> Self {
        self.variables.push(variable);
        self
    }
}

/// A registered class: id plus variables in wire order.
#[derive(Debug, Clone)]
pub struct ClassRegistration {
    id: ClassId,
    name: &'static str,
    variables: Vec<VariableDescriptor>,
}

impl ClassRegistration {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Variables in wire order; the index is the slot.
    pub fn variables(&self) -> &[VariableDescriptor] {
        &self.variables
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    /// Factory for a fresh instance: default values in slot order.
    pub fn spawn_defaults(&self) -> Vec<WireValue> {
        self.variables.iter().map(|v| v.default).collect()
    }

    /// Reads one value per variable, in wire order.
    pub fn read_values(&self, r: &mut PacketReader) -> Result<Vec<WireValue>, CodecError> {
        self.variables
            .iter()
            .map(|v| WireValue::read(v.wire, r))
            .collect()
    }

    /// Writes `values` in wire order after checking them against the schema.
    pub fn write_values(
        &self,
        w: &mut PacketWriter,
        values: &[WireValue],
    ) -> Result<(), RegistryError> {
        self.check_values(values)?;
        for value in values {
            value.write(w);
        }
        Ok(())
    }

    fn check_values(&self, values: &[WireValue]) -> Result<(), RegistryError> {
        if values.len() != self.variables.len() {
            return Err(RegistryError::ValueCount {
                class: self.name.to_string(),
                expected: self.variables.len(),
                got: values.len(),
            });
        }
        for (var, value) in self.variables.iter().zip(values) {
            if value.wire_type() != var.wire {
                return Err(RegistryError::ValueType {
                    class: self.name.to_string(),
                    variable: var.name.to_string(),
                    wire: var.wire,
                    found: value.wire_type(),
                });
            }
        }
        Ok(())
    }
}

/// Entity state that decoded variables are written into.
pub trait ReplicatedState {
    fn network_id(&self) -> EntityId;
    /// Stores a time-indexed sample for an interpolated variable.
    fn push_sample(&mut self, slot: usize, frame: u32, value: WireValue);
    /// Sets a non-interpolated variable directly.
    fn assign(&mut self, slot: usize, value: WireValue);
}

/// The process-wide class table.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: Vec<ClassRegistration>,
    by_name: HashMap<&'static str, ClassId>,
}

impl ClassRegistry {
    /// Sorts, numbers and validates the declared classes.
    pub fn init(mut classes: Vec<ClassDescriptor>) -> Result<Self, RegistryError> {
        if classes.len() > MAX_CLASSES {
            return Err(RegistryError::TooManyClasses(classes.len()));
        }
        classes.sort_by(|a, b| a.name.cmp(b.name));

        let mut registered = Vec::with_capacity(classes.len());
        let mut by_name = HashMap::with_capacity(classes.len());
        for (index, mut class) in classes.into_iter().enumerate() {
            if usize::from(class.expected_id) != index {
                return Err(RegistryError::IdMismatch {
                    class: class.name.to_string(),
                    expected: class.expected_id,
                    computed: index,
                });
            }
            // index < MAX_CLASSES, checked above
            let id = ClassId(index as u8);
            if by_name.insert(class.name, id).is_some() {
                return Err(RegistryError::DuplicateClass(class.name.to_string()));
            }

            class.variables.sort_by(|a, b| a.name.cmp(b.name));
            validate_variables(class.name, &class.variables)?;

            debug!(class = class.name, id = id.0, variables = class.variables.len(), "Registered class");
            registered.push(ClassRegistration {
                id,
                name: class.name,
                variables: class.variables,
            });
        }

        info!(classes = registered.len(), "Class registry initialised");
        Ok(Self {
            classes: registered,
            by_name,
        })
    }

    pub fn get(&self, id: ClassId) -> Result<&ClassRegistration, RegistryError> {
        self.classes
            .get(usize::from(id.0))
            .ok_or(RegistryError::UnknownClass(id.0))
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassRegistration> {
        self.by_name
            .get(name)
            .and_then(|id| self.classes.get(usize::from(id.0)))
    }

    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassRegistration> {
        self.classes.iter()
    }

    /// Applies already-decoded values to `target`.
    ///
    /// Interpolated variables become samples at `frame`; the rest are
    /// assigned. Reactions run after the value is stored.
    pub fn apply<S: ReplicatedState + ?Sized>(
        &self,
        class: ClassId,
        frame: u32,
        values: &[WireValue],
        target: &mut S,
        events: &mut EventBus,
    ) -> Result<(), RegistryError> {
        let registration = self.get(class)?;
        registration.check_values(values)?;
        let entity = target.network_id();
        for (slot, (var, value)) in registration.variables.iter().zip(values).enumerate() {
            if var.interpolated {
                target.push_sample(slot, frame, *value);
            } else {
                target.assign(slot, *value);
            }
            if let Some(reaction) = var.reaction {
                reaction(entity, value, events);
            }
        }
        Ok(())
    }

    /// Reads a class's variables off `r` and applies them to `target`.
    pub fn deserialize<S: ReplicatedState + ?Sized>(
        &self,
        r: &mut PacketReader,
        frame: u32,
        class: ClassId,
        target: &mut S,
        events: &mut EventBus,
    ) -> Result<(), RegistryError> {
        let values = self.get(class)?.read_values(r)?;
        self.apply(class, frame, &values, target, events)
    }
}

fn validate_variables(class: &str, variables: &[VariableDescriptor]) -> Result<(), RegistryError> {
    for pair in variables.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(RegistryError::DuplicateVariable {
                class: class.to_string(),
                variable: pair[0].name.to_string(),
            });
        }
    }
    for var in variables {
        if var.interpolated && !var.wire.is_interpolable() {
            return Err(RegistryError::NotInterpolable {
                class: class.to_string(),
                variable: var.name.to_string(),
                wire: var.wire,
            });
        }
        if var.default.wire_type() != var.wire {
            return Err(RegistryError::DefaultTypeMismatch {
                class: class.to_string(),
                variable: var.name.to_string(),
                wire: var.wire,
                found: var.default.wire_type(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;
    use rand::seq::SliceRandom;

    #[derive(Default)]
    struct Probe {
        samples: Vec<(usize, u32, WireValue)>,
        assigned: Vec<(usize, WireValue)>,
    }

    impl ReplicatedState for Probe {
        fn network_id(&self) -> EntityId {
            EntityId(7)
        }
        fn push_sample(&mut self, slot: usize, frame: u32, value: WireValue) {
            self.samples.push((slot, frame, value));
        }
        fn assign(&mut self, slot: usize, value: WireValue) {
            self.assigned.push((slot, value));
        }
    }

    struct Flash(EntityId);

    fn flash(entity: EntityId, _value: &WireValue, events: &mut EventBus) {
        events.push(Flash(entity));
    }

    fn declarations() -> Vec<ClassDescriptor> {
        vec![
            ClassDescriptor::new("Zeppelin", 3),
            ClassDescriptor::new("Apple", 0)
                .var(VariableDescriptor::new("y", WireType::F32).interpolated())
                .var(VariableDescriptor::new("hp", WireType::U8).on_change(flash)),
            ClassDescriptor::new("Mortar", 2),
            ClassDescriptor::new("Banana", 1).var(VariableDescriptor::new("ripe", WireType::Bool)),
        ]
    }

    #[test]
    fn ids_follow_name_order() {
        let reg = ClassRegistry::init(declarations()).unwrap();
        let names: Vec<_> = reg.iter().map(|c| (c.name(), c.id().0)).collect();
        assert_eq!(
            names,
            vec![("Apple", 0), ("Banana", 1), ("Mortar", 2), ("Zeppelin", 3)]
        );
        assert_eq!(reg.id_of("Mortar"), Some(ClassId(2)));
    }

    #[test]
    fn ids_are_independent_of_declaration_order() {
        let mut rng = rand::thread_rng();
        let reference = ClassRegistry::init(declarations()).unwrap();
        for _ in 0..16 {
            let mut shuffled = declarations();
            shuffled.shuffle(&mut rng);
            for class in &mut shuffled {
                class.variables.shuffle(&mut rng);
            }
            let reg = ClassRegistry::init(shuffled).unwrap();
            for class in reference.iter() {
                let other = reg.by_name(class.name()).unwrap();
                assert_eq!(other.id(), class.id());
                let a: Vec<_> = class.variables().iter().map(|v| v.name).collect();
                let b: Vec<_> = other.variables().iter().map(|v| v.name).collect();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn variables_sorted_into_slots() {
        let reg = ClassRegistry::init(declarations()).unwrap();
        let apple = reg.by_name("Apple").unwrap();
        assert_eq!(apple.slot_of("hp"), Some(0));
        assert_eq!(apple.slot_of("y"), Some(1));
    }

    #[test]
    fn schema_drift_is_fatal() {
        let mut decls = declarations();
        decls.push(ClassDescriptor::new("Carrot", 4));
        match ClassRegistry::init(decls) {
            Err(RegistryError::IdMismatch {
                class,
                expected,
                computed,
            }) => {
                assert_eq!(class, "Carrot");
                assert_eq!(expected, 4);
                assert_eq!(computed, 2);
            }
            other => panic!("expected id mismatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_variables() {
        let dup = vec![ClassDescriptor::new("A", 0)
            .var(VariableDescriptor::new("x", WireType::U8))
            .var(VariableDescriptor::new("x", WireType::U16))];
        assert!(matches!(
            ClassRegistry::init(dup),
            Err(RegistryError::DuplicateVariable { .. })
        ));

        let bool_interp = vec![ClassDescriptor::new("A", 0)
            .var(VariableDescriptor::new("on", WireType::Bool).interpolated())];
        assert!(matches!(
            ClassRegistry::init(bool_interp),
            Err(RegistryError::NotInterpolable { .. })
        ));

        let bad_default = vec![ClassDescriptor::new("A", 0).var(
            VariableDescriptor::new("hp", WireType::U8).with_default(WireValue::I16(3)),
        )];
        assert!(matches!(
            ClassRegistry::init(bad_default),
            Err(RegistryError::DefaultTypeMismatch { .. })
        ));

        let twice = vec![ClassDescriptor::new("A", 0), ClassDescriptor::new("A", 1)];
        assert!(ClassRegistry::init(twice).is_err());
    }

    #[test]
    fn deserialize_routes_by_interpolated_flag() {
        let reg = ClassRegistry::init(declarations()).unwrap();
        let apple = reg.id_of("Apple").unwrap();

        let mut w = PacketWriter::new();
        w.write_u8(50); // hp
        w.write_f32(2.5); // y
        let mut r = PacketReader::new(w.freeze());

        let mut probe = Probe::default();
        let mut events = EventBus::default();
        reg.deserialize(&mut r, 12, apple, &mut probe, &mut events)
            .unwrap();

        assert_eq!(probe.assigned, vec![(0, WireValue::U8(50))]);
        assert_eq!(probe.samples, vec![(1, 12, WireValue::F32(2.5))]);
        let flashes = events.drain::<Flash>();
        assert_eq!(flashes.len(), 1);
        assert_eq!(flashes[0].0, EntityId(7));
        assert!(!r.has_more_data());
    }

    #[test]
    fn unknown_class_is_an_error() {
        let reg = ClassRegistry::init(declarations()).unwrap();
        let mut r = PacketReader::new(Vec::new());
        let err = reg
            .deserialize(&mut r, 0, ClassId(9), &mut Probe::default(), &mut EventBus::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownClass(9));
    }

    #[test]
    fn truncated_values_underrun() {
        let reg = ClassRegistry::init(declarations()).unwrap();
        let mut r = PacketReader::new(vec![50u8, 0x40]);
        let err = reg
            .deserialize(
                &mut r,
                0,
                ClassId(0),
                &mut Probe::default(),
                &mut EventBus::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Codec(CodecError::BufferUnderrun { needed: 4, remaining: 1 })
        ));
    }

    #[test]
    fn write_values_checks_schema() {
        let reg = ClassRegistry::init(declarations()).unwrap();
        let apple = reg.by_name("Apple").unwrap();
        let mut w = PacketWriter::new();
        assert!(apple
            .write_values(&mut w, &[WireValue::U8(1), WireValue::Vec2(Vec2::ZERO)])
            .is_err());
        assert!(apple.write_values(&mut w, &[WireValue::U8(1)]).is_err());
        apple
            .write_values(&mut w, &[WireValue::U8(1), WireValue::F32(0.5)])
            .unwrap();
        assert_eq!(w.len(), 5);
    }
}
