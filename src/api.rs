//! Public API for the simulation.
//!
//! [`Simulation`] is the handle a host (game loop, renderer, network layer)
//! holds. It owns the store and exposes body creation, player controls,
//! lifecycle and queries. Everything here is callable from any thread; motion
//! changes are queued and applied by the body's own batch on its next tick.
//!
//! ## Lifecycle
//!
//! ```text
//! build() -> Starting --activate--> Alive <--pause/resume--> Paused
//!                                     \--------shutdown-------> Stopped
//! ```
//!
//! In `SchedulerMode::Manual` nothing ticks until [`Simulation::step`] is
//! called, which makes tests and replays deterministic.

use crate::body::{Body, BodySpec, PlayerState, PlayerStatus};
use crate::clock::{Clock, MonotonicClock};
use crate::components::{BodyCategory, BodyId, BodyState, EmitterId, Kinematics};
use crate::config::SimConfig;
use crate::emitter::EmitterConfig;
use crate::error::{Result, SimError};
use crate::events::{Action, ActionKind};
use crate::pool::PoolStats;
use crate::ports::{LifecycleObserver, NullObserver, RuleEngine};
use crate::rules::LimitRebound;
use crate::scheduler::{SchedulerStats, ShutdownReport};
use crate::spatial::{Aabb, GridStatistics};
use crate::store::{CounterSnapshot, ModelState, SimulationStore};
use crate::systems::movement::Control;
use crate::world::{Snapshot, StoreStatistics};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`Simulation`] from its collaborators.
pub struct SimulationBuilder {
    config: SimConfig,
    rules: Arc<dyn RuleEngine>,
    observer: Arc<dyn LifecycleObserver>,
    clock: Arc<dyn Clock>,
}

impl SimulationBuilder {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            rules: Arc::new(LimitRebound),
            observer: Arc::new(NullObserver),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn rules(mut self, rules: Arc<dyn RuleEngine>) -> Self {
        self.rules = rules;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and start the scheduler.
    pub fn build(self) -> Result<Simulation> {
        let store = SimulationStore::new(self.config, self.clock, self.rules, self.observer)?;
        Ok(Simulation { store })
    }
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

// ============================================================================
// SIMULATION
// ============================================================================

/// Host-facing handle to a running simulation.
///
/// Dropping it shuts the simulation down.
pub struct Simulation {
    store: Arc<SimulationStore>,
}

impl Simulation {
    pub fn builder(config: SimConfig) -> SimulationBuilder {
        SimulationBuilder::new(config)
    }

    /// Simulation with the default collaborators.
    pub fn new(config: SimConfig) -> Result<Self> {
        SimulationBuilder::new(config).build()
    }

    pub fn store(&self) -> &Arc<SimulationStore> {
        &self.store
    }

    pub fn config(&self) -> &SimConfig {
        self.store.config()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn activate(&self) -> bool {
        self.store.activate()
    }

    pub fn pause(&self) -> bool {
        self.store.pause()
    }

    pub fn resume(&self) -> bool {
        self.store.resume()
    }

    pub fn shutdown(&self) -> ShutdownReport {
        self.store.shutdown()
    }

    pub fn state(&self) -> ModelState {
        self.store.state()
    }

    /// Tick every body once. Only meaningful in manual mode.
    pub fn step(&self) {
        self.store.scheduler().run_pass();
    }

    // ------------------------------------------------------------------
    // Bodies
    // ------------------------------------------------------------------

    /// Create a body. `Ok(None)` when the Dynamic cap is reached.
    ///
    /// The lifecycle observer is notified just like for spawned bodies.
    pub fn add_body(&self, spec: BodySpec) -> Result<Option<BodyId>> {
        let Some(body) = self.store.add_body(&spec)? else {
            return Ok(None);
        };
        if body.category().is_static() {
            self.store.observer.new_static(body.id(), body.asset_id());
        } else {
            self.store.observer.new_dynamic(body.id(), body.asset_id());
        }
        Ok(Some(body.id()))
    }

    /// Ask a body to die on its next tick.
    pub fn kill(&self, id: BodyId) -> Result<()> {
        let body = self.body(id)?;
        body.enqueue_external_action(Action::new(body.body_ref(), ActionKind::Die, None));
        Ok(())
    }

    fn body(&self, id: BodyId) -> Result<Arc<Body>> {
        self.store.body(id).ok_or(SimError::UnknownBody(id))
    }

    fn player(&self, id: BodyId) -> Result<Arc<Body>> {
        let body = self.body(id)?;
        if body.category() != BodyCategory::Player {
            return Err(SimError::WrongCategory {
                id,
                expected: "Player",
                found: body.category(),
            });
        }
        Ok(body)
    }

    pub fn equip_emitter(&self, id: BodyId, config: EmitterConfig) -> Result<EmitterId> {
        self.body(id)?.equip_emitter(config)
    }

    /// Emitter fired every tick while the body thrusts.
    pub fn equip_trail(&self, id: BodyId, config: EmitterConfig) -> Result<EmitterId> {
        self.body(id)?.equip_trail(config)
    }

    /// Arm one emitter for its next opportunity.
    pub fn emitter_request(&self, id: BodyId, emitter: EmitterId) -> Result<bool> {
        Ok(self.body(id)?.request_emission(emitter))
    }

    pub fn add_weapon(&self, id: BodyId, config: EmitterConfig) -> Result<EmitterId> {
        self.body(id)?.add_weapon(config)
    }

    /// Returns the newly active weapon index.
    pub fn select_next_weapon(&self, id: BodyId) -> Result<Option<usize>> {
        let body = self.player(id)?;
        let mut player = body.player().ok_or(SimError::UnknownBody(id))?.lock();
        Ok(player.select_next_weapon())
    }

    /// Request a shot from the active weapon.
    pub fn fire(&self, id: BodyId) -> Result<()> {
        let body = self.player(id)?;
        let mut player = body.player().ok_or(SimError::UnknownBody(id))?.lock();
        if player.register_fire_request() {
            Ok(())
        } else {
            Err(SimError::NoActiveWeapon(id))
        }
    }

    // ------------------------------------------------------------------
    // Player controls
    // ------------------------------------------------------------------

    fn control(&self, id: BodyId, f: impl FnOnce(&PlayerState) -> Vec<Control>) -> Result<()> {
        let body = self.player(id)?;
        let controls = {
            let player = body.player().ok_or(SimError::UnknownBody(id))?.lock();
            f(&player)
        };
        for control in controls {
            body.push_control(control);
        }
        Ok(())
    }

    pub fn thrust_on(&self, id: BodyId) -> Result<()> {
        self.control(id, |p| vec![Control::SetThrust(p.max_thrust)])
    }

    pub fn reverse_thrust(&self, id: BodyId) -> Result<()> {
        self.control(id, |p| vec![Control::SetThrust(-p.max_thrust)])
    }

    pub fn thrust_off(&self, id: BodyId) -> Result<()> {
        self.control(id, |_| vec![Control::StopPushing])
    }

    pub fn rotate_left(&self, id: BodyId) -> Result<()> {
        self.control(id, |p| {
            vec![Control::Rotate {
                acc_inc: -p.max_angular_acceleration,
                kickoff_speed: -p.default_angular_speed,
            }]
        })
    }

    pub fn rotate_right(&self, id: BodyId) -> Result<()> {
        self.control(id, |p| {
            vec![Control::Rotate {
                acc_inc: p.max_angular_acceleration,
                kickoff_speed: p.default_angular_speed,
            }]
        })
    }

    pub fn rotate_off(&self, id: BodyId) -> Result<()> {
        self.control(id, |_| vec![Control::SetAngularAcceleration(0.0), Control::SetAngularSpeed(0.0)])
    }

    /// Screen-space movement independent of the ship's heading.
    pub fn set_move_directions(&self, id: BodyId, up: bool, down: bool, left: bool, right: bool) -> Result<()> {
        self.control(id, |p| {
            let (acc_x, acc_y) = p.direction_acceleration(up, down, left, right);
            vec![Control::SetDirectAcceleration { acc_x, acc_y }]
        })
    }

    pub fn set_angle(&self, id: BodyId, degrees: f64) -> Result<()> {
        self.control(id, |_| vec![Control::SetAngle(degrees)])
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn kinematics(&self, id: BodyId) -> Option<Kinematics> {
        self.store.kinematics(id)
    }

    pub fn body_state(&self, id: BodyId) -> Option<BodyState> {
        self.store.body_state(id)
    }

    pub fn player_status(&self, id: BodyId) -> Result<PlayerStatus> {
        let body = self.player(id)?;
        let player = body.player().ok_or(SimError::UnknownBody(id))?.lock();
        Ok(player.status(id))
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.store.counters()
    }

    pub fn query_region(&self, aabb: Aabb) -> Vec<BodyId> {
        self.store.query_region(aabb)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_store(&self.store)
    }

    pub fn snapshot_json(&self) -> Result<String> {
        Ok(self.snapshot().to_json()?)
    }

    pub fn grid_statistics(&self) -> GridStatistics {
        self.store.grid.statistics()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.store.scheduler().stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.store.pool.stats()
    }

    pub fn statistics(&self) -> StoreStatistics {
        StoreStatistics::from_store(&self.store)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if self.store.state() != ModelState::Stopped {
            debug!("simulation dropped while running; shutting down");
            self.store.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::emitter::SpawnConfig;
    use crate::events::DomainEvent;
    use crate::rules::DeadInLimits;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn manual(size: f64) -> (Simulation, Arc<ManualClock>) {
        let mut config = SimConfig::with_world(size, size).manual();
        config.snapshot_pool_capacity = 64;
        let clock = Arc::new(ManualClock::new());
        let sim = Simulation::builder(config).clock(clock.clone()).build().unwrap();
        (sim, clock)
    }

    fn tick(sim: &Simulation, clock: &ManualClock, secs: f64) {
        clock.advance_secs(secs);
        sim.step();
    }

    #[derive(Default)]
    struct SpawnRecorder {
        actions: Mutex<Vec<ActionKind>>,
    }

    impl RuleEngine for SpawnRecorder {
        fn provide_actions(&self, events: &[DomainEvent], actions: &mut Vec<Action>) {
            let before = actions.len();
            LimitRebound.provide_actions(events, actions);
            self.actions.lock().extend(actions[before..].iter().map(|a| a.kind));
        }
    }

    #[derive(Default)]
    struct Births {
        dynamic: AtomicUsize,
        statics: AtomicUsize,
    }

    impl LifecycleObserver for Births {
        fn new_dynamic(&self, _id: BodyId, _asset_id: &str) {
            self.dynamic.fetch_add(1, Ordering::SeqCst);
        }
        fn new_static(&self, _id: BodyId, _asset_id: &str) {
            self.statics.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_body_notifies_observer() {
        let births = Arc::new(Births::default());
        let sim = Simulation::builder(SimConfig::with_world(100.0, 100.0).manual())
            .observer(births.clone())
            .build()
            .unwrap();
        sim.add_body(BodySpec::dynamic(1.0, 1.0, 1.0)).unwrap();
        sim.add_body(BodySpec::gravity(50.0, 50.0, 10.0)).unwrap();
        assert_eq!(births.dynamic.load(Ordering::SeqCst), 1);
        assert_eq!(births.statics.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thrust_moves_player_along_heading() {
        let (sim, clock) = manual(10_000.0);
        let id = sim.add_body(BodySpec::player(5000.0, 5000.0, 10.0)).unwrap().unwrap();
        sim.activate();
        sim.set_angle(id, 0.0).unwrap();
        sim.thrust_on(id).unwrap();

        for _ in 0..10 {
            tick(&sim, &clock, 0.05);
        }
        let k = sim.kinematics(id).unwrap();
        let (hx, hy) = k.heading();
        let along = (k.pos_x - 5000.0) * hx + (k.pos_y - 5000.0) * hy;
        assert!(along > 0.0);
        assert_eq!(k.thrust, sim.config().player_max_thrust);

        sim.thrust_off(id).unwrap();
        tick(&sim, &clock, 0.05);
        assert_eq!(sim.kinematics(id).unwrap().thrust, 0.0);
    }

    #[test]
    fn test_rotation_controls() {
        let (sim, clock) = manual(1000.0);
        let id = sim.add_body(BodySpec::player(500.0, 500.0, 10.0)).unwrap().unwrap();
        sim.activate();

        sim.rotate_right(id).unwrap();
        tick(&sim, &clock, 0.01);
        let k = sim.kinematics(id).unwrap();
        assert!(k.angular_speed > 0.0);
        assert!(k.angular_acc > 0.0);

        sim.rotate_off(id).unwrap();
        tick(&sim, &clock, 0.01);
        let k = sim.kinematics(id).unwrap();
        assert_eq!(k.angular_speed, 0.0);
        assert_eq!(k.angular_acc, 0.0);
    }

    #[test]
    fn test_move_directions() {
        let (sim, clock) = manual(1000.0);
        let id = sim.add_body(BodySpec::player(500.0, 500.0, 10.0)).unwrap().unwrap();
        sim.activate();
        sim.set_move_directions(id, false, true, false, false).unwrap();
        tick(&sim, &clock, 0.05);
        let k = sim.kinematics(id).unwrap();
        assert!(k.pos_y > 500.0);
        assert_eq!(k.acc_y, sim.config().player_max_thrust);
    }

    #[test]
    fn test_controls_need_a_player() {
        let (sim, _clock) = manual(1000.0);
        let rock = sim.add_body(BodySpec::dynamic(1.0, 1.0, 1.0)).unwrap().unwrap();
        assert!(matches!(sim.thrust_on(rock), Err(SimError::WrongCategory { .. })));
        assert!(matches!(sim.fire(BodyId(999)), Err(SimError::UnknownBody(_))));
    }

    #[test]
    fn test_fire_spawns_projectile() {
        let births = Arc::new(Births::default());
        let mut config = SimConfig::with_world(1000.0, 1000.0).manual();
        config.snapshot_pool_capacity = 16;
        let clock = Arc::new(ManualClock::new());
        let sim = Simulation::builder(config)
            .clock(clock.clone())
            .observer(births.clone())
            .build()
            .unwrap();
        let ship = sim.add_body(BodySpec::player(500.0, 500.0, 10.0)).unwrap().unwrap();
        assert!(matches!(sim.fire(ship), Err(SimError::NoActiveWeapon(_))));

        let shot = SpawnConfig::projectile("shot", 400.0, 2.0, 2.0);
        sim.add_weapon(ship, EmitterConfig::continuous(shot, 5.0)).unwrap();
        sim.activate();
        sim.fire(ship).unwrap();
        tick(&sim, &clock, 0.016);

        assert_eq!(sim.counters().projectile, 1);
        assert_eq!(births.dynamic.load(Ordering::SeqCst), 2);
        let status = sim.player_status(ship).unwrap();
        assert_eq!(status.active_weapon, Some(0));
    }

    #[test]
    fn test_empty_magazine_fires_nothing() {
        let rules = Arc::new(SpawnRecorder::default());
        let mut config = SimConfig::with_world(1000.0, 1000.0).manual();
        config.snapshot_pool_capacity = 16;
        let clock = Arc::new(ManualClock::new());
        let sim = Simulation::builder(config)
            .clock(clock.clone())
            .rules(rules.clone())
            .build()
            .unwrap();
        let ship = sim.add_body(BodySpec::player(500.0, 500.0, 10.0)).unwrap().unwrap();
        let shot = SpawnConfig::projectile("shot", 400.0, 2.0, 2.0);
        sim.add_weapon(ship, EmitterConfig::magazine(shot, 5.0, 0, 1.0)).unwrap();
        sim.activate();

        sim.fire(ship).unwrap();
        tick(&sim, &clock, 0.016);

        assert!(!rules.actions.lock().contains(&ActionKind::SpawnProjectile));
        assert_eq!(sim.counters().projectile, 0);
    }

    #[test]
    fn test_kill_is_applied_on_next_tick() {
        let (sim, clock) = manual(1000.0);
        let id = sim.add_body(BodySpec::dynamic(10.0, 10.0, 1.0)).unwrap().unwrap();
        sim.activate();
        sim.kill(id).unwrap();
        assert_eq!(sim.body_state(id), Some(BodyState::Alive));
        tick(&sim, &clock, 0.01);
        assert_eq!(sim.body_state(id), None);
        assert_eq!(sim.counters().dead, 1);
    }

    #[test]
    fn test_dead_in_limits_stops_player() {
        let mut config = SimConfig::with_world(1000.0, 1000.0).manual();
        config.snapshot_pool_capacity = 16;
        let clock = Arc::new(ManualClock::new());
        let sim = Simulation::builder(config)
            .clock(clock.clone())
            .rules(Arc::new(DeadInLimits))
            .build()
            .unwrap();
        let ship = sim
            .add_body(BodySpec::player(990.0, 500.0, 10.0).with_speed(400.0, 0.0))
            .unwrap()
            .unwrap();
        let rock = sim
            .add_body(BodySpec::dynamic(990.0, 100.0, 10.0).with_speed(400.0, 0.0))
            .unwrap()
            .unwrap();
        sim.activate();
        tick(&sim, &clock, 0.05);

        let k = sim.kinematics(ship).unwrap();
        assert_eq!(k.speed_x, 0.0);
        assert!(k.pos_x < 1000.0);
        assert_eq!(sim.body_state(rock), None);
    }

    #[test]
    fn test_emitter_spawns_until_cap() {
        let mut config = SimConfig::with_world(1000.0, 1000.0).manual();
        config.max_dynamic_bodies = 3;
        config.snapshot_pool_capacity = 16;
        let clock = Arc::new(ManualClock::new());
        let sim = Simulation::builder(config).clock(clock.clone()).build().unwrap();
        let source = sim.add_body(BodySpec::dynamic(500.0, 500.0, 10.0)).unwrap().unwrap();
        let emitter = sim
            .equip_emitter(source, EmitterConfig::continuous(SpawnConfig::default(), 100.0))
            .unwrap();
        sim.activate();

        for _ in 0..10 {
            assert!(sim.emitter_request(source, emitter).unwrap());
            tick(&sim, &clock, 0.05);
        }
        assert_eq!(sim.counters().dynamic, 3);
    }

    #[test]
    fn test_threaded_simulation_runs_and_shuts_down() {
        let mut config = SimConfig::with_world(2000.0, 2000.0);
        config.worker_threads = 2;
        config.runner_sleep_ms = 1;
        config.shutdown_timeout_ms = 2_000;
        config.snapshot_pool_capacity = 128;
        let sim = Simulation::new(config).unwrap();
        let ids: Vec<_> = (0..25)
            .map(|i| {
                let spec = BodySpec::dynamic(100.0 + i as f64 * 60.0, 1000.0, 5.0).with_speed(50.0, 30.0);
                sim.add_body(spec).unwrap().unwrap()
            })
            .collect();
        sim.activate();

        let start = sim.kinematics(ids[0]).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while sim.kinematics(ids[0]).unwrap().pos_x == start.pos_x && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sim.kinematics(ids[0]).unwrap().pos_x > start.pos_x);
        assert_eq!(sim.scheduler_stats().batches, 3);

        let report = sim.shutdown();
        assert_eq!(report.forced, 0);
        assert_eq!(sim.state(), ModelState::Stopped);
    }
}
