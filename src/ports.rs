//! Interfaces to the collaborators around the core.
//!
//! The rule engine is consumed: the store hands it events and reads back
//! actions. The lifecycle observer is notified outward and never calls back
//! into the store.

use crate::components::BodyId;
use crate::events::{Action, DomainEvent};

/// Game policy mapping detected events to actions.
///
/// Implementations must be pure with respect to the core: no calls back
/// into the simulation, only appends to `actions`.
pub trait RuleEngine: Send + Sync {
    fn provide_actions(&self, events: &[DomainEvent], actions: &mut Vec<Action>);
}

/// Presentation-side hooks for bodies appearing and disappearing.
///
/// Called from worker threads; keep them cheap.
pub trait LifecycleObserver: Send + Sync {
    fn new_dynamic(&self, _id: BodyId, _asset_id: &str) {}
    fn new_static(&self, _id: BodyId, _asset_id: &str) {}
    fn dynamic_is_dead(&self, _id: BodyId) {}
    fn player_is_dead(&self, _id: BodyId) {}
    fn static_is_dead(&self, _id: BodyId) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl LifecycleObserver for NullObserver {}
