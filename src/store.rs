//! Simulation store: owns every body and runs the per-body event pipeline.
//!
//! The store is the single owner of the world's shared state: the category
//! maps, the spatial grid, the snapshot pool, the counters and the batch
//! scheduler. Each batch calls back into it through [`BodyTicker`] once per
//! body per pass.
//!
//! ## Tick
//! 1. Fold queued controls into the last snapshot.
//! 2. Integrate to `now`.
//! 3. Move the body in the grid.
//! 4. Run [`SimulationStore::process_body_events`]: detect, decide, execute.
//!
//! Static bodies (Decorator, Gravity) skip 1-3 and only run the pipeline
//! when something can happen to them: their lifetime ran out, another body
//! queued an action on them, or they carry emitters.

use crate::body::{Body, BodyPayload, BodySpec, PlayerState};
use crate::clock::Clock;
use crate::components::{BodyCategory, BodyId, BodyState, Kinematics};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::pool::SnapshotPool;
use crate::ports::{LifecycleObserver, RuleEngine};
use crate::scheduler::{BatchScheduler, BodyTicker, ShutdownReport};
use crate::spatial::{Aabb, SpatialGrid};
use crate::systems::{actions, detection};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

// ============================================================================
// MODEL STATE
// ============================================================================

/// Lifecycle of the whole simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModelState {
    /// Bodies can be added but nothing moves yet.
    Starting = 0,
    Alive = 1,
    /// Ticks only refresh timestamps.
    Paused = 2,
    Stopped = 3,
}

impl ModelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ModelState::Starting,
            1 => ModelState::Alive,
            2 => ModelState::Paused,
            _ => ModelState::Stopped,
        }
    }
}

// ============================================================================
// COUNTERS
// ============================================================================

const CATEGORY_SLOTS: usize = 5;

#[inline]
fn slot(category: BodyCategory) -> usize {
    match category {
        BodyCategory::Dynamic => 0,
        BodyCategory::Player => 1,
        BodyCategory::Projectile => 2,
        BodyCategory::Decorator => 3,
        BodyCategory::Gravity => 4,
    }
}

/// Point-in-time copy of [`BodyCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub alive: u64,
    pub created: u64,
    pub dead: u64,
    pub dynamic: u64,
    pub player: u64,
    pub projectile: u64,
    pub decorator: u64,
    pub gravity: u64,
}

impl CounterSnapshot {
    pub fn alive_of(&self, category: BodyCategory) -> u64 {
        match category {
            BodyCategory::Dynamic => self.dynamic,
            BodyCategory::Player => self.player,
            BodyCategory::Projectile => self.projectile,
            BodyCategory::Decorator => self.decorator,
            BodyCategory::Gravity => self.gravity,
        }
    }
}

/// Body counts, updated atomically from every worker.
#[derive(Debug, Default)]
pub struct BodyCounters {
    alive: AtomicU64,
    created: AtomicU64,
    dead: AtomicU64,
    alive_by_category: [AtomicU64; CATEGORY_SLOTS],
}

impl BodyCounters {
    /// Count a new body. With a `cap`, fails without counting when the
    /// category already has `cap` bodies alive.
    fn try_register(&self, category: BodyCategory, cap: Option<u64>) -> bool {
        let counter = &self.alive_by_category[slot(category)];
        match cap {
            Some(cap) => {
                let reserved = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < cap).then_some(n + 1)
                });
                if reserved.is_err() {
                    return false;
                }
            }
            None => {
                counter.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.alive.fetch_add(1, Ordering::AcqRel);
        self.created.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Undo a registration whose body never made it into the world.
    fn unregister(&self, category: BodyCategory) {
        self.alive_by_category[slot(category)].fetch_sub(1, Ordering::AcqRel);
        self.alive.fetch_sub(1, Ordering::AcqRel);
        self.created.fetch_sub(1, Ordering::Relaxed);
    }

    fn on_dead(&self, category: BodyCategory) {
        self.alive_by_category[slot(category)].fetch_sub(1, Ordering::AcqRel);
        self.alive.fetch_sub(1, Ordering::AcqRel);
        self.dead.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alive_of(&self, category: BodyCategory) -> u64 {
        self.alive_by_category[slot(category)].load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let by = |c| self.alive_of(c);
        CounterSnapshot {
            alive: self.alive.load(Ordering::Acquire),
            created: self.created.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            dynamic: by(BodyCategory::Dynamic),
            player: by(BodyCategory::Player),
            projectile: by(BodyCategory::Projectile),
            decorator: by(BodyCategory::Decorator),
            gravity: by(BodyCategory::Gravity),
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

type BodyMap = RwLock<HashMap<BodyId, Arc<Body>>>;

/// Grid footprint of a snapshot.
#[inline]
pub(crate) fn footprint(k: &Kinematics) -> Aabb {
    Aabb::around(k.pos_x, k.pos_y, k.size * 0.5)
}

/// Shared state of one simulation.
pub struct SimulationStore {
    pub(crate) config: SimConfig,
    state: AtomicU8,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rules: Arc<dyn RuleEngine>,
    pub(crate) observer: Arc<dyn LifecycleObserver>,
    pub(crate) grid: SpatialGrid,
    pub(crate) pool: SnapshotPool<Kinematics>,
    scheduler: BatchScheduler,
    /// Dynamic, Player and Projectile bodies.
    dynamic: BodyMap,
    decorators: BodyMap,
    gravity: BodyMap,
    counters: BodyCounters,
    next_id: AtomicU64,
    /// Serializes model state transitions.
    transition: Mutex<()>,
}

impl SimulationStore {
    /// Build a store in the `Starting` state.
    pub fn new(
        config: SimConfig,
        clock: Arc<dyn Clock>,
        rules: Arc<dyn RuleEngine>,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let grid = SpatialGrid::new(
            config.world_width,
            config.world_height,
            config.cell_size,
            config.max_cells_per_body,
        )?;
        let pool = SnapshotPool::new(config.snapshot_pool_capacity);
        pool.preallocate(config.snapshot_pool_capacity);
        let workers = BatchScheduler::build_pool(&config)?;

        let store = Arc::new_cyclic(|weak: &Weak<Self>| {
            let ticker: Weak<dyn BodyTicker> = weak.clone();
            let scheduler = BatchScheduler::with_pool(&config, ticker, workers);
            Self {
                config,
                state: AtomicU8::new(ModelState::Starting as u8),
                clock,
                rules,
                observer,
                grid,
                pool,
                scheduler,
                dynamic: RwLock::new(HashMap::new()),
                decorators: RwLock::new(HashMap::new()),
                gravity: RwLock::new(HashMap::new()),
                counters: BodyCounters::default(),
                next_id: AtomicU64::new(1),
                transition: Mutex::new(()),
            }
        });
        debug!(
            width = store.config.world_width,
            height = store.config.world_height,
            mode = ?store.config.scheduler_mode,
            "simulation store created"
        );
        Ok(store)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    // ------------------------------------------------------------------
    // Model lifecycle
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self) -> ModelState {
        ModelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn switch(&self, from: ModelState, to: ModelState) -> bool {
        let _guard = self.transition.lock();
        if self.state() != from {
            return false;
        }
        self.state.store(to as u8, Ordering::Release);
        true
    }

    /// `Starting -> Alive`.
    pub fn activate(&self) -> bool {
        let ok = self.switch(ModelState::Starting, ModelState::Alive);
        if ok {
            info!(bodies = self.counters.snapshot().alive, "simulation activated");
        }
        ok
    }

    /// `Alive -> Paused`.
    pub fn pause(&self) -> bool {
        let ok = self.switch(ModelState::Alive, ModelState::Paused);
        if ok {
            info!("simulation paused");
        }
        ok
    }

    /// `Paused -> Alive`.
    pub fn resume(&self) -> bool {
        let ok = self.switch(ModelState::Paused, ModelState::Alive);
        if ok {
            info!("simulation resumed");
        }
        ok
    }

    /// Stop the model and the scheduler. Idempotent.
    pub fn shutdown(&self) -> ShutdownReport {
        {
            let _guard = self.transition.lock();
            if self.state() == ModelState::Stopped {
                return ShutdownReport::default();
            }
            self.state.store(ModelState::Stopped as u8, Ordering::Release);
        }
        let report = self.scheduler.shutdown();
        info!(
            stopped = report.stopped,
            forced = report.forced,
            alive = self.counters.snapshot().alive,
            "simulation shut down"
        );
        report
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    // ------------------------------------------------------------------
    // Bodies
    // ------------------------------------------------------------------

    fn map_for(&self, category: BodyCategory) -> &BodyMap {
        match category {
            BodyCategory::Dynamic | BodyCategory::Player | BodyCategory::Projectile => &self.dynamic,
            BodyCategory::Decorator => &self.decorators,
            BodyCategory::Gravity => &self.gravity,
        }
    }

    /// Create a body and hand it to the scheduler.
    ///
    /// Returns `Ok(None)` when the Dynamic cap is reached or the store has
    /// stopped.
    pub fn add_body(&self, spec: &BodySpec) -> Result<Option<Arc<Body>>> {
        spec.validate()?;
        if self.state() == ModelState::Stopped {
            debug!(category = spec.category.as_str(), "store stopped; body rejected");
            return Ok(None);
        }

        let category = spec.category;
        let cap = (category == BodyCategory::Dynamic).then_some(self.config.max_dynamic_bodies as u64);
        if !self.counters.try_register(category, cap) {
            debug!(max = self.config.max_dynamic_bodies, "dynamic body cap reached; body rejected");
            return Ok(None);
        }

        let id = BodyId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let payload = match category {
            BodyCategory::Player => BodyPayload::Player(Mutex::new(PlayerState::new(
                self.config.player_max_thrust,
                self.config.player_max_angular_acceleration,
                self.config.player_default_angular_speed,
            ))),
            BodyCategory::Projectile => match spec.shooter {
                Some(shooter) => BodyPayload::Projectile { shooter },
                None => {
                    self.counters.unregister(category);
                    return Err(SimError::MissingShooter);
                }
            },
            _ => BodyPayload::Plain,
        };
        let body = Arc::new(Body::new(id, spec, self.now(), payload, &self.pool));

        let upserted = {
            let mut scratch = body.scratch();
            self.grid.upsert(id, footprint(&body.kinematics()), &mut scratch.cells)
        };
        if let Err(err) = upserted {
            self.counters.unregister(category);
            body.release_buffers(&self.pool);
            return Err(err);
        }

        self.map_for(category).write().insert(id, Arc::clone(&body));
        body.activate();
        if !self.scheduler.assign(&body) {
            // Shutdown raced with creation
            self.remove_body(&body);
            return Ok(None);
        }
        trace!(body = %id, category = category.as_str(), "body added");
        Ok(Some(body))
    }

    /// Kill `body` and drop it from every index. True for the call that
    /// actually killed it.
    pub(crate) fn remove_body(&self, body: &Body) -> bool {
        if !body.die() {
            return false;
        }
        let id = body.id();
        let category = body.category();
        self.grid.remove(id);
        self.map_for(category).write().remove(&id);
        body.release_buffers(&self.pool);
        self.counters.on_dead(category);

        match category {
            BodyCategory::Player => self.observer.player_is_dead(id),
            BodyCategory::Dynamic | BodyCategory::Projectile => self.observer.dynamic_is_dead(id),
            BodyCategory::Decorator | BodyCategory::Gravity => self.observer.static_is_dead(id),
        }
        trace!(body = %id, "body removed");
        true
    }

    /// Any live body by id.
    pub fn body(&self, id: BodyId) -> Option<Arc<Body>> {
        if let Some(body) = self.dynamic.read().get(&id) {
            return Some(Arc::clone(body));
        }
        if let Some(body) = self.gravity.read().get(&id) {
            return Some(Arc::clone(body));
        }
        self.decorators.read().get(&id).cloned()
    }

    /// Body that can take part in a collision: not a decorator, not dead.
    pub(crate) fn collidable(&self, id: BodyId) -> Option<Arc<Body>> {
        let body = self
            .dynamic
            .read()
            .get(&id)
            .cloned()
            .or_else(|| self.gravity.read().get(&id).cloned())?;
        (!body.is_dead()).then_some(body)
    }

    pub fn kinematics(&self, id: BodyId) -> Option<Kinematics> {
        self.body(id).map(|b| b.kinematics())
    }

    pub fn body_state(&self, id: BodyId) -> Option<BodyState> {
        self.body(id).map(|b| b.state())
    }

    /// Every live body, dynamic first, then gravity, then decorators.
    pub fn bodies(&self) -> Vec<Arc<Body>> {
        let mut out = Vec::with_capacity(self.counters.snapshot().alive as usize);
        out.extend(self.dynamic.read().values().cloned());
        out.extend(self.gravity.read().values().cloned());
        out.extend(self.decorators.read().values().cloned());
        out
    }

    /// Ids of bodies whose grid cells overlap `aabb`.
    pub fn query_region(&self, aabb: Aabb) -> Vec<BodyId> {
        let mut out = Vec::new();
        self.grid.query_region(aabb, &mut out);
        out
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    /// Run detect, decide and execute for one body.
    ///
    /// `new` is the integrated candidate snapshot, `old` the one it was
    /// integrated from. Failures and panics are logged and swallowed; the
    /// body is always handed back unless it died.
    pub fn process_body_events(&self, body: &Arc<Body>, new: Kinematics, old: Kinematics) {
        match self.state() {
            ModelState::Alive => {}
            ModelState::Starting | ModelState::Paused => {
                body.commit(old.with_timestamp(new.timestamp_ns), &self.pool);
                return;
            }
            ModelState::Stopped => return,
        }
        if !body.try_hand_off() {
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_pipeline(body, &new, &old)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(body = %body.id(), error = %err, "body pipeline failed"),
            Err(_) => warn!(body = %body.id(), "body pipeline panicked"),
        }

        body.release_hands_off();
    }

    fn run_pipeline(&self, body: &Arc<Body>, new: &Kinematics, old: &Kinematics) -> Result<()> {
        let mut guard = body.scratch();
        let scratch = &mut *guard;
        scratch.events.clear();
        scratch.actions.clear();

        detection::detect(self, body, new, old, scratch)?;
        actions::decide(self, body, &scratch.events, &mut scratch.actions)?;
        let result = actions::execute(self, body, &scratch.actions, new, old, &mut scratch.cells);

        scratch.events.clear();
        scratch.actions.clear();
        result
    }

    fn tick_static(&self, body: &Arc<Body>) {
        let now = self.now();
        let due = body.is_life_over(now) || body.has_pending_actions() || !body.emitters().is_empty();
        if !due {
            return;
        }
        let old = body.kinematics();
        let new = body.integrator().integrate(&old, now);
        self.process_body_events(body, new, old);
    }

    fn tick_moving(&self, body: &Arc<Body>) {
        let now = self.now();
        let old = body.kinematics();
        if self.state() != ModelState::Alive {
            self.process_body_events(body, old.with_timestamp(now), old);
            return;
        }

        let base = body.apply_controls(old);
        let new = body.integrator().integrate(&base, now);
        {
            let mut scratch = body.scratch();
            if let Err(err) = self.grid.upsert(body.id(), footprint(&new), &mut scratch.cells) {
                warn!(body = %body.id(), error = %err, "grid update failed");
            }
        }
        if new.is_thrusting() {
            body.request_trail();
        }
        self.process_body_events(body, new, base);
    }
}

impl BodyTicker for SimulationStore {
    fn tick(&self, body: &Arc<Body>) {
        if body.state() != BodyState::Alive {
            return;
        }
        if body.category().is_static() {
            self.tick_static(body);
        } else {
            self.tick_moving(body);
        }
    }
}
