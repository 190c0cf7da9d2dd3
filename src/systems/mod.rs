//! Per-tick systems run by the store for each body.
//!
//! - `movement`: integration, controls and boundary responses (pure).
//! - `detection`: limit, collision, emitter, fire and lifetime events.
//! - `actions`: building the action list and applying it.

pub(crate) mod actions;
pub(crate) mod detection;
pub mod movement;

pub use movement::{Control, Integrator, Rebound, REBOUND_EPSILON};
