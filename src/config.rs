//! Construction-time configuration.
//!
//! [`SimConfig`] carries the world bounds, capacity limits, grid sizing and
//! scheduler tuning. It round-trips through JSON so hosts can keep it next
//! to their level data.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How batches are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerMode {
    /// Batches run continuously on the worker pool.
    Threaded,
    /// Batches only run when the host calls `step()`, on the host thread.
    Manual,
}

/// Configuration for the simulation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// World width in world units. Bodies live in `[0, width)`.
    pub world_width: f64,
    /// World height in world units. Bodies live in `[0, height)`.
    pub world_height: f64,
    /// Upper bound on concurrently alive Dynamic bodies.
    pub max_dynamic_bodies: usize,
    /// Spatial grid cell edge length.
    pub cell_size: f64,
    /// Largest number of cells one body may overlap.
    pub max_cells_per_body: usize,
    /// Batch capacity for every category except Player.
    pub batch_size: usize,
    /// Batch capacity for Player bodies.
    pub player_batch_size: usize,
    /// Pause between two passes of a batch.
    pub runner_sleep_ms: u64,
    /// Worker threads in the pool. 0 picks the available parallelism.
    pub worker_threads: usize,
    /// How long `shutdown()` waits for batches before forcing them down.
    pub shutdown_timeout_ms: u64,
    /// Seconds during which a projectile cannot hurt its own shooter.
    pub projectile_immunity_secs: f64,
    /// Size multiplier range applied when a spawn asks for a random size.
    pub spawn_size_jitter: (f64, f64),
    /// Multiplier range applied to positive lifetimes of spawned bodies.
    pub lifetime_jitter: (f64, f64),
    /// Kinematics buffers kept around for reuse.
    pub snapshot_pool_capacity: usize,
    /// Thrust applied by `thrust_on` on players.
    pub player_max_thrust: f64,
    /// Angular acceleration (deg/s^2) applied by player rotation.
    pub player_max_angular_acceleration: f64,
    /// Angular speed (deg/s) given to a player that starts rotating from rest.
    pub player_default_angular_speed: f64,
    pub scheduler_mode: SchedulerMode,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_width: 2000.0,
            world_height: 2000.0,
            max_dynamic_bodies: 5000,
            cell_size: 128.0,
            max_cells_per_body: 1512,
            batch_size: 10,
            player_batch_size: 1,
            runner_sleep_ms: 12,
            worker_threads: 0,
            shutdown_timeout_ms: 30_000,
            projectile_immunity_secs: 0.4,
            spawn_size_jitter: (0.25, 3.0),
            lifetime_jitter: (0.5, 2.5),
            snapshot_pool_capacity: 10_000,
            player_max_thrust: 1000.0,
            player_max_angular_acceleration: 1000.0,
            player_default_angular_speed: 30.0,
            scheduler_mode: SchedulerMode::Threaded,
        }
    }
}

impl SimConfig {
    /// Default configuration for a world of the given size.
    pub fn with_world(world_width: f64, world_height: f64) -> Self {
        Self {
            world_width,
            world_height,
            ..Default::default()
        }
    }

    /// Same configuration, driven manually from the host thread.
    pub fn manual(mut self) -> Self {
        self.scheduler_mode = SchedulerMode::Manual;
        self
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every field for values the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(SimError::InvalidConfig(msg));

        if !(self.world_width > 0.0 && self.world_height > 0.0) {
            return bad(format!(
                "world must have positive size, got {}x{}",
                self.world_width, self.world_height
            ));
        }
        if !(self.cell_size > 0.0) {
            return bad(format!("cell_size must be positive, got {}", self.cell_size));
        }
        if self.max_cells_per_body == 0 {
            return bad("max_cells_per_body must be at least 1".into());
        }
        if self.batch_size == 0 || self.player_batch_size == 0 {
            return bad("batch sizes must be at least 1".into());
        }
        if self.projectile_immunity_secs < 0.0 {
            return bad("projectile_immunity_secs must not be negative".into());
        }
        for (name, (lo, hi)) in [
            ("spawn_size_jitter", self.spawn_size_jitter),
            ("lifetime_jitter", self.lifetime_jitter),
        ] {
            if !(lo > 0.0 && lo <= hi) {
                return bad(format!("{name} must satisfy 0 < min <= max, got ({lo}, {hi})"));
            }
        }
        if self.player_max_thrust < 0.0 || self.player_max_angular_acceleration < 0.0 {
            return bad("player limits must not be negative".into());
        }
        Ok(())
    }

    pub fn runner_sleep(&self) -> Duration {
        Duration::from_millis(self.runner_sleep_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Number of worker threads to build the pool with.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}
