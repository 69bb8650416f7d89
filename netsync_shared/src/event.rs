//! Typed event bus.
//!
//! Variable reactions publish one-shot events here (an effect to trigger, a
//! sound to play). The host drains them once per update. A host that never
//! drains a type keeps only the newest `limit` events of it.

use std::{
    any::{Any, TypeId},
    collections::{HashMap, VecDeque},
};

use tracing::warn;

/// Typed event bus.
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    limit: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }
}

impl EventBus {
    /// Undrained events kept per type by [`EventBus::default`].
    pub const DEFAULT_LIMIT: usize = 1_024;

    pub fn with_limit(limit: usize) -> Self {
        Self {
            queues: HashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Pushes an event into the queue, dropping the oldest one of the same
    /// type when the queue is full.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(VecDeque::<E>::new()));
        if let Some(q) = q.downcast_mut::<VecDeque<E>>() {
            if q.len() >= self.limit {
                q.pop_front();
                warn!(
                    event = std::any::type_name::<E>(),
                    limit = self.limit,
                    "Event queue full, dropping oldest"
                );
            }
            q.push_back(e);
        }
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<VecDeque<E>>().ok())
            .map(|boxed| Vec::from(*boxed))
            .unwrap_or_default()
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<VecDeque<E>>())
            .map_or(0, VecDeque::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("types", &self.queues.len())
            .field("limit", &self.limit)
            .finish()
    }
}
