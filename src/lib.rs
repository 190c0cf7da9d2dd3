//! Orbit - Simulation Core
//!
//! A real-time 2D arcade physics core. Bodies are ticked concurrently in
//! fixed-size batches on a worker pool; each tick integrates motion,
//! detects events against a shared spatial grid, asks a pluggable rule
//! engine what to do and applies the answer.
//!
//! Start with [`SimulationBuilder`] and drive everything through
//! [`Simulation`].

pub mod api;
pub mod body;
pub mod clock;
pub mod components;
pub mod config;
pub mod emitter;
pub mod error;
pub mod events;
pub mod pool;
pub mod ports;
pub mod rules;
pub mod scheduler;
pub mod spatial;
pub mod store;
pub mod systems;
pub mod world;

pub use api::{Simulation, SimulationBuilder};
pub use body::{BodySpec, PlayerStatus};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use components::*;
pub use config::{SchedulerMode, SimConfig};
pub use emitter::{EmitterConfig, SpawnConfig};
pub use error::{Result, SimError};
pub use events::{Action, ActionKind, DomainEvent, EmitKind};
pub use ports::{LifecycleObserver, NullObserver, RuleEngine};
pub use rules::{DeadInLimits, InLimitsGoToCenter, LimitRebound, ReboundAndCollision};
pub use spatial::{Aabb, GridStatistics, SpatialGrid};
pub use store::{CounterSnapshot, ModelState};
pub use world::{Snapshot, StoreStatistics};
