//! Error types for the simulation core.
//!
//! Validation failures at the public API are returned as [`SimError`].
//! Failures inside a body's tick never leave the store; they are logged
//! and the body carries on with its next tick.

use crate::components::{BodyCategory, BodyId};
use thiserror::Error;

/// Everything that can go wrong when configuring or driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("body size must be positive, got {0}")]
    InvalidSize(f64),

    #[error("body mass must be non-negative, got {0}")]
    InvalidMass(f64),

    #[error("max lifetime must be -1 (infinite) or positive, got {0}")]
    InvalidLifetime(f64),

    #[error("projectiles need a shooter id")]
    MissingShooter,

    #[error("invalid emitter configuration: {0}")]
    InvalidEmitter(String),

    #[error("unknown body {0}")]
    UnknownBody(BodyId),

    #[error("body {id} is a {found:?}, expected {expected}")]
    WrongCategory {
        id: BodyId,
        expected: &'static str,
        found: BodyCategory,
    },

    #[error("player {0} has no weapon equipped")]
    NoActiveWeapon(BodyId),

    #[error("body spans {needed} grid cells but at most {capacity} are allowed; raise cell_size or max_cells_per_body")]
    CellBufferOverflow { needed: usize, capacity: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SimError>;
