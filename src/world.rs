//! Render snapshot types.
//!
//! The `Snapshot` struct is a serializable copy of every live body that a
//! renderer or a network layer can consume without touching the store.

use crate::body::PlayerStatus;
use crate::components::{BodyCategory, BodyState};
use crate::spatial::GridStatistics;
use crate::store::{CounterSnapshot, ModelState, SimulationStore};
use serde::{Deserialize, Serialize};

/// One body as a renderer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodySnapshot {
    pub id: u64,
    pub category: BodyCategory,
    pub state: BodyState,
    pub asset_id: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Degrees.
    pub angle: f64,
    pub size: f64,
    pub thrust: f64,
    /// Clock reading of the snapshot, in nanoseconds.
    pub timestamp_ns: u64,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Clock reading when the snapshot was taken.
    pub timestamp_ns: u64,
    pub model_state: ModelState,
    /// Dynamic, player and projectile bodies, sorted by id.
    pub dynamic: Vec<BodySnapshot>,
    /// Gravity and decorator bodies, sorted by id.
    pub statics: Vec<BodySnapshot>,
    pub players: Vec<PlayerStatus>,
    pub counters: CounterSnapshot,
}

impl Snapshot {
    /// Collect every live body of `store`.
    ///
    /// Each body is read independently, so bodies ticked by different
    /// batches may be a tick apart.
    pub fn from_store(store: &SimulationStore) -> Self {
        let mut dynamic = Vec::new();
        let mut statics = Vec::new();
        let mut players = Vec::new();

        for body in store.bodies() {
            if body.is_dead() {
                continue;
            }
            let k = body.shared_kinematics();
            let entry = BodySnapshot {
                id: body.id().0,
                category: body.category(),
                state: body.state(),
                asset_id: body.asset_id().to_string(),
                x: k.pos_x,
                y: k.pos_y,
                vx: k.speed_x,
                vy: k.speed_y,
                angle: k.angle,
                size: k.size,
                thrust: k.thrust,
                timestamp_ns: k.timestamp_ns,
            };
            if let Some(player) = body.player() {
                players.push(player.lock().status(body.id()));
            }
            if body.category().is_static() {
                statics.push(entry);
            } else {
                dynamic.push(entry);
            }
        }

        dynamic.sort_by_key(|b| b.id);
        statics.sort_by_key(|b| b.id);
        players.sort_by_key(|p| p.id);

        Self {
            timestamp_ns: store.now(),
            model_state: store.state(),
            dynamic,
            statics,
            players,
            counters: store.counters(),
        }
    }

    pub fn body_count(&self) -> usize {
        self.dynamic.len() + self.statics.len()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON (for debugging).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Diagnostic view of the store internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub grid: GridStatistics,
    pub counters: CounterSnapshot,
    pub batches: usize,
    pub batched_bodies: usize,
    pub worker_threads: usize,
}

impl StoreStatistics {
    pub fn from_store(store: &SimulationStore) -> Self {
        let scheduler = store.scheduler().stats();
        Self {
            grid: store.grid.statistics(),
            counters: store.counters(),
            batches: scheduler.batches,
            batched_bodies: scheduler.bodies,
            worker_threads: scheduler.worker_threads,
        }
    }
}
