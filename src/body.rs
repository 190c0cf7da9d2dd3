//! Bodies: identity, lifecycle state and per-body runtime data.
//!
//! A [`Body`] is shared (`Arc`) between the store's category maps, its
//! batch and any thread reading its kinematics. Only the batch that owns it
//! ever commits new kinematics; everyone else talks to it through its
//! queues:
//!
//! - `controls`: motion changes from input handling.
//! - `inbox`: actions decided by other bodies' ticks.

use crate::clock::secs_between;
use crate::components::{BodyCategory, BodyId, BodyRef, BodyState, EmitterId, Kinematics};
use crate::emitter::{Emitter, EmitterConfig, SpawnConfig};
use crate::error::{Result, SimError};
use crate::events::{Action, DomainEvent};
use crate::pool::{KinematicsCell, SnapshotPool};
use crate::systems::movement::{Control, Integrator};
use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

// ============================================================================
// BODY SPEC
// ============================================================================

/// Everything needed to create a body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodySpec {
    pub category: BodyCategory,
    /// Visual key forwarded to the lifecycle observer.
    pub asset_id: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub size: f64,
    pub speed_x: f64,
    pub speed_y: f64,
    pub acc_x: f64,
    pub acc_y: f64,
    pub angle: f64,
    pub angular_speed: f64,
    pub angular_acc: f64,
    pub thrust: f64,
    pub mass: f64,
    /// Seconds to live, or -1 for forever.
    pub max_lifetime: f64,
    /// Body that emitted this one. Required for projectiles.
    pub shooter: Option<BodyId>,
}

impl BodySpec {
    /// Body of `category` at rest at `(x, y)`, living forever.
    pub fn new(category: BodyCategory, x: f64, y: f64, size: f64) -> Self {
        Self {
            category,
            asset_id: String::new(),
            pos_x: x,
            pos_y: y,
            size,
            speed_x: 0.0,
            speed_y: 0.0,
            acc_x: 0.0,
            acc_y: 0.0,
            angle: 0.0,
            angular_speed: 0.0,
            angular_acc: 0.0,
            thrust: 0.0,
            mass: 0.0,
            max_lifetime: -1.0,
            shooter: None,
        }
    }

    pub fn dynamic(x: f64, y: f64, size: f64) -> Self {
        Self::new(BodyCategory::Dynamic, x, y, size)
    }

    pub fn player(x: f64, y: f64, size: f64) -> Self {
        Self::new(BodyCategory::Player, x, y, size)
    }

    pub fn projectile(x: f64, y: f64, size: f64, shooter: BodyId, max_lifetime: f64) -> Self {
        Self {
            shooter: Some(shooter),
            max_lifetime,
            ..Self::new(BodyCategory::Projectile, x, y, size)
        }
    }

    pub fn decorator(x: f64, y: f64, size: f64) -> Self {
        Self::new(BodyCategory::Decorator, x, y, size)
    }

    pub fn gravity(x: f64, y: f64, size: f64) -> Self {
        Self::new(BodyCategory::Gravity, x, y, size)
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = asset_id.into();
        self
    }

    pub fn with_speed(mut self, speed_x: f64, speed_y: f64) -> Self {
        self.speed_x = speed_x;
        self.speed_y = speed_y;
        self
    }

    pub fn with_acceleration(mut self, acc_x: f64, acc_y: f64) -> Self {
        self.acc_x = acc_x;
        self.acc_y = acc_y;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_lifetime(mut self, max_lifetime: f64) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    /// Fail fast on values no body can be created with.
    pub fn validate(&self) -> Result<()> {
        if !(self.size > 0.0) {
            return Err(SimError::InvalidSize(self.size));
        }
        if !(self.mass >= 0.0) {
            return Err(SimError::InvalidMass(self.mass));
        }
        if !(self.max_lifetime == -1.0 || self.max_lifetime > 0.0) {
            return Err(SimError::InvalidLifetime(self.max_lifetime));
        }
        if self.category == BodyCategory::Projectile && self.shooter.is_none() {
            return Err(SimError::MissingShooter);
        }
        Ok(())
    }

    pub(crate) fn initial_kinematics(&self, now_ns: u64) -> Kinematics {
        Kinematics {
            timestamp_ns: now_ns,
            pos_x: self.pos_x,
            pos_y: self.pos_y,
            angle: self.angle.rem_euclid(360.0),
            size: self.size,
            speed_x: self.speed_x,
            speed_y: self.speed_y,
            acc_x: self.acc_x,
            acc_y: self.acc_y,
            angular_speed: self.angular_speed,
            angular_acc: self.angular_acc,
            thrust: self.thrust,
        }
    }
}

// ============================================================================
// PLAYER PAYLOAD
// ============================================================================

/// Public status of a player, as shown by a HUD.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub id: u64,
    pub damage: f64,
    pub energy: f64,
    pub shield: f64,
    pub temperature: f64,
    /// Index of the selected weapon, if any.
    pub active_weapon: Option<usize>,
    /// Remaining ammunition ratio per weapon, in equip order.
    pub ammo: Vec<f64>,
    pub score: u64,
}

/// Player-only state: weapons, ship limits, directional input and status.
#[derive(Debug)]
pub struct PlayerState {
    weapons: Vec<Emitter>,
    active_weapon: Option<usize>,
    pub max_thrust: f64,
    pub max_angular_acceleration: f64,
    pub default_angular_speed: f64,
    pub damage: f64,
    pub energy: f64,
    pub shield: f64,
    pub temperature: f64,
    score: u64,
}

impl PlayerState {
    pub fn new(max_thrust: f64, max_angular_acceleration: f64, default_angular_speed: f64) -> Self {
        Self {
            weapons: Vec::new(),
            active_weapon: None,
            max_thrust,
            max_angular_acceleration,
            default_angular_speed,
            damage: 0.0,
            energy: 1.0,
            shield: 1.0,
            temperature: 0.0,
            score: 0,
        }
    }

    /// Equip a weapon. The first one equipped becomes active.
    pub fn add_weapon(&mut self, weapon: Emitter) -> usize {
        self.weapons.push(weapon);
        if self.active_weapon.is_none() {
            self.active_weapon = Some(0);
        }
        self.weapons.len() - 1
    }

    /// Cycle to the next weapon, wrapping around.
    pub fn select_next_weapon(&mut self) -> Option<usize> {
        if self.weapons.is_empty() {
            return None;
        }
        let next = self.active_weapon.map_or(0, |i| (i + 1) % self.weapons.len());
        self.active_weapon = Some(next);
        Some(next)
    }

    pub fn active_weapon(&self) -> Option<usize> {
        self.active_weapon
    }

    pub fn weapon_count(&self) -> usize {
        self.weapons.len()
    }

    /// Returns false when no weapon is equipped.
    pub fn register_fire_request(&mut self) -> bool {
        match self.active_weapon.and_then(|i| self.weapons.get_mut(i)) {
            Some(weapon) => {
                weapon.register_request();
                true
            }
            None => false,
        }
    }

    /// Spawn template of the active weapon if it fires this tick.
    pub fn must_fire_now(&mut self, dt: f64) -> Option<Arc<SpawnConfig>> {
        let weapon = self.active_weapon.and_then(|i| self.weapons.get_mut(i))?;
        if weapon.must_emit_now(dt) {
            Some(Arc::clone(weapon.spawn()))
        } else {
            None
        }
    }

    pub fn add_score(&mut self, points: u64) {
        self.score = self.score.saturating_add(points);
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    /// Acceleration produced by the four directional inputs. Diagonals are
    /// normalised to `max_thrust`.
    pub fn direction_acceleration(&self, up: bool, down: bool, left: bool, right: bool) -> (f64, f64) {
        let force = self.max_thrust;
        let mut acc_x = 0.0;
        let mut acc_y = 0.0;
        if up {
            acc_y -= force;
        }
        if down {
            acc_y += force;
        }
        if left {
            acc_x -= force;
        }
        if right {
            acc_x += force;
        }
        if (up || down) && (left || right) {
            let magnitude = (acc_x * acc_x + acc_y * acc_y).sqrt();
            if magnitude > 0.0 {
                acc_x = acc_x / magnitude * force;
                acc_y = acc_y / magnitude * force;
            }
        }
        (acc_x, acc_y)
    }

    pub fn status(&self, id: BodyId) -> PlayerStatus {
        PlayerStatus {
            id: id.0,
            damage: self.damage,
            energy: self.energy,
            shield: self.shield,
            temperature: self.temperature,
            active_weapon: self.active_weapon,
            ammo: self.weapons.iter().map(Emitter::ammo_ratio).collect(),
            score: self.score,
        }
    }
}

/// Category-specific data.
#[derive(Debug)]
pub enum BodyPayload {
    Plain,
    Player(Mutex<PlayerState>),
    Projectile { shooter: BodyId },
}

// ============================================================================
// BODY
// ============================================================================

/// Emitters attached to a body.
#[derive(Debug, Default)]
pub struct EmitterSet {
    pub(crate) list: Vec<Emitter>,
    pub(crate) trail: Option<EmitterId>,
}

impl EmitterSet {
    pub fn get_mut(&mut self, id: EmitterId) -> Option<&mut Emitter> {
        self.list.iter_mut().find(|e| e.id() == id)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// Per-body buffers reused by every tick to avoid allocation.
#[derive(Default)]
pub(crate) struct Scratch {
    pub candidates: Vec<BodyId>,
    pub seen: HashSet<BodyId>,
    pub cells: Vec<usize>,
    pub events: Vec<DomainEvent>,
    pub actions: Vec<Action>,
}

/// A simulated entity.
pub struct Body {
    id: BodyId,
    category: BodyCategory,
    state: AtomicU8,
    integrator: Integrator,
    kinematics: KinematicsCell,
    born_ns: u64,
    max_lifetime: f64,
    mass: f64,
    asset_id: String,
    payload: BodyPayload,
    emitters: Mutex<EmitterSet>,
    next_emitter: AtomicU32,
    controls: SegQueue<Control>,
    inbox: SegQueue<Action>,
    scratch: Mutex<Scratch>,
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("state", &self.state())
            .field("kinematics", &self.kinematics())
            .finish()
    }
}

impl Body {
    /// Build a body in the `Starting` state. `spec` must already be validated.
    pub(crate) fn new(
        id: BodyId,
        spec: &BodySpec,
        now_ns: u64,
        payload: BodyPayload,
        pool: &SnapshotPool<Kinematics>,
    ) -> Self {
        let integrator = if spec.category.is_moving() {
            Integrator::Integrating
        } else {
            Integrator::Null
        };
        Self {
            id,
            category: spec.category,
            state: AtomicU8::new(BodyState::Starting as u8),
            integrator,
            kinematics: KinematicsCell::new(spec.initial_kinematics(now_ns), pool),
            born_ns: now_ns,
            max_lifetime: spec.max_lifetime,
            mass: spec.mass,
            asset_id: spec.asset_id.clone(),
            payload,
            emitters: Mutex::new(EmitterSet::default()),
            next_emitter: AtomicU32::new(0),
            controls: SegQueue::new(),
            inbox: SegQueue::new(),
            scratch: Mutex::new(Scratch::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> BodyId {
        self.id
    }

    #[inline]
    pub fn category(&self) -> BodyCategory {
        self.category
    }

    #[inline]
    pub fn body_ref(&self) -> BodyRef {
        BodyRef::new(self.id, self.category)
    }

    pub fn integrator(&self) -> Integrator {
        self.integrator
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn max_lifetime(&self) -> f64 {
        self.max_lifetime
    }

    pub fn born_ns(&self) -> u64 {
        self.born_ns
    }

    pub fn payload(&self) -> &BodyPayload {
        &self.payload
    }

    /// Shooter of a projectile.
    pub fn shooter(&self) -> Option<BodyId> {
        match self.payload {
            BodyPayload::Projectile { shooter } => Some(shooter),
            _ => None,
        }
    }

    pub fn player(&self) -> Option<&Mutex<PlayerState>> {
        match &self.payload {
            BodyPayload::Player(state) => Some(state),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self) -> BodyState {
        BodyState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state() == BodyState::Dead
    }

    fn transition(&self, from: BodyState, to: BodyState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Starting -> Alive`. False if the body was already activated.
    pub fn activate(&self) -> bool {
        self.transition(BodyState::Starting, BodyState::Alive)
    }

    /// `Alive -> HandsOff`: claim the body for one pipeline run.
    pub fn try_hand_off(&self) -> bool {
        self.transition(BodyState::Alive, BodyState::HandsOff)
    }

    /// `HandsOff -> Alive`. No-op if the body died meanwhile.
    pub fn release_hands_off(&self) -> bool {
        self.transition(BodyState::HandsOff, BodyState::Alive)
    }

    /// `Alive | HandsOff -> Dead`. True only for the call that killed it.
    pub fn die(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match BodyState::from_u8(raw) {
                    BodyState::Alive | BodyState::HandsOff => Some(BodyState::Dead as u8),
                    BodyState::Starting | BodyState::Dead => None,
                }
            })
            .is_ok()
    }

    /// Whether `max_lifetime` has elapsed at `now_ns`.
    pub fn is_life_over(&self, now_ns: u64) -> bool {
        self.max_lifetime > 0.0 && secs_between(self.born_ns, now_ns) >= self.max_lifetime
    }

    /// Seconds since the body was created.
    pub fn age(&self, now_ns: u64) -> f64 {
        secs_between(self.born_ns, now_ns)
    }

    // ------------------------------------------------------------------
    // Kinematics
    // ------------------------------------------------------------------

    /// Copy of the last committed snapshot.
    #[inline]
    pub fn kinematics(&self) -> Kinematics {
        self.kinematics.get()
    }

    /// Shared handle to the last committed snapshot.
    #[inline]
    pub fn shared_kinematics(&self) -> Arc<Kinematics> {
        self.kinematics.load()
    }

    /// Publish a new snapshot. Only the owning batch calls this.
    pub(crate) fn commit(&self, value: Kinematics, pool: &SnapshotPool<Kinematics>) {
        self.kinematics.commit(value, pool);
    }

    pub(crate) fn release_buffers(&self, pool: &SnapshotPool<Kinematics>) {
        self.kinematics.release_into(pool);
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    /// Queue a motion change for the next tick.
    pub fn push_control(&self, control: Control) {
        self.controls.push(control);
    }

    /// Fold every queued control into `k`.
    pub(crate) fn apply_controls(&self, mut k: Kinematics) -> Kinematics {
        while let Some(control) = self.controls.pop() {
            k = control.apply(k);
        }
        k
    }

    pub fn has_pending_controls(&self) -> bool {
        !self.controls.is_empty()
    }

    /// Queue an action decided by another body's tick.
    pub fn enqueue_external_action(&self, action: Action) {
        self.inbox.push(action);
    }

    pub(crate) fn drain_inbox_into(&self, out: &mut Vec<Action>) {
        while let Some(action) = self.inbox.pop() {
            out.push(action);
        }
    }

    pub fn has_pending_actions(&self) -> bool {
        !self.inbox.is_empty()
    }

    pub(crate) fn scratch(&self) -> MutexGuard<'_, Scratch> {
        self.scratch.lock()
    }

    // ------------------------------------------------------------------
    // Emitters
    // ------------------------------------------------------------------

    fn next_emitter_id(&self) -> EmitterId {
        EmitterId(self.next_emitter.fetch_add(1, Ordering::Relaxed))
    }

    /// Attach an emitter and return its id.
    pub fn equip_emitter(&self, config: EmitterConfig) -> Result<EmitterId> {
        config.validate()?;
        let id = self.next_emitter_id();
        self.emitters.lock().list.push(Emitter::new(id, Arc::new(config)));
        Ok(id)
    }

    /// Attach an emitter that is requested every tick while thrusting.
    pub fn equip_trail(&self, config: EmitterConfig) -> Result<EmitterId> {
        let id = self.equip_emitter(config)?;
        self.emitters.lock().trail = Some(id);
        Ok(id)
    }

    /// Add a weapon to a player.
    pub fn add_weapon(&self, config: EmitterConfig) -> Result<EmitterId> {
        let player = self.player().ok_or(SimError::WrongCategory {
            id: self.id,
            expected: "Player",
            found: self.category,
        })?;
        config.validate()?;
        let id = self.next_emitter_id();
        player.lock().add_weapon(Emitter::new(id, Arc::new(config)));
        Ok(id)
    }

    /// Arm one emitter. Returns false if the id is unknown.
    pub fn request_emission(&self, id: EmitterId) -> bool {
        match self.emitters.lock().get_mut(id) {
            Some(emitter) => {
                emitter.register_request();
                true
            }
            None => false,
        }
    }

    pub(crate) fn emitters(&self) -> MutexGuard<'_, EmitterSet> {
        self.emitters.lock()
    }

    /// Arm the trail emitter, if any.
    pub(crate) fn request_trail(&self) {
        let mut set = self.emitters.lock();
        if let Some(trail) = set.trail {
            if let Some(emitter) = set.get_mut(trail) {
                emitter.register_request();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::SpawnConfig;

    fn pool() -> SnapshotPool<Kinematics> {
        SnapshotPool::new(16)
    }

    fn body(category: BodyCategory) -> Body {
        let spec = BodySpec::new(category, 10.0, 20.0, 8.0);
        Body::new(BodyId(1), &spec, 0, BodyPayload::Plain, &pool())
    }

    #[test]
    fn test_spec_validation() {
        assert!(BodySpec::dynamic(0.0, 0.0, 0.0).validate().is_err());
        assert!(matches!(
            BodySpec::dynamic(0.0, 0.0, 1.0).with_lifetime(0.0).validate(),
            Err(SimError::InvalidLifetime(_))
        ));
        assert!(matches!(
            BodySpec::new(BodyCategory::Projectile, 0.0, 0.0, 1.0).validate(),
            Err(SimError::MissingShooter)
        ));
        BodySpec::projectile(0.0, 0.0, 1.0, BodyId(3), 2.0).validate().unwrap();
        BodySpec::dynamic(0.0, 0.0, 1.0).with_lifetime(-1.0).validate().unwrap();
    }

    #[test]
    fn test_state_machine() {
        let b = body(BodyCategory::Dynamic);
        assert_eq!(b.state(), BodyState::Starting);
        // Cannot claim or kill before activation
        assert!(!b.try_hand_off());
        assert!(!b.die());

        assert!(b.activate());
        assert!(!b.activate());
        assert!(b.try_hand_off());
        assert!(!b.try_hand_off());
        assert!(b.release_hands_off());
        assert_eq!(b.state(), BodyState::Alive);

        assert!(b.try_hand_off());
        assert!(b.die());
        assert!(!b.release_hands_off());
        assert!(!b.die());
        assert_eq!(b.state(), BodyState::Dead);
        assert!(!b.activate());
    }

    #[test]
    fn test_lifetime() {
        let spec = BodySpec::dynamic(0.0, 0.0, 1.0).with_lifetime(2.0);
        let b = Body::new(BodyId(1), &spec, 1_000_000_000, BodyPayload::Plain, &pool());
        assert!(!b.is_life_over(2_900_000_000));
        assert!(b.is_life_over(3_000_000_000));

        let forever = body(BodyCategory::Dynamic);
        assert!(!forever.is_life_over(u64::MAX / 2));
    }

    #[test]
    fn test_integrator_by_category() {
        assert_eq!(body(BodyCategory::Dynamic).integrator(), Integrator::Integrating);
        assert_eq!(body(BodyCategory::Gravity).integrator(), Integrator::Null);
        assert_eq!(body(BodyCategory::Decorator).integrator(), Integrator::Null);
    }

    #[test]
    fn test_controls_are_applied_in_order() {
        let b = body(BodyCategory::Dynamic);
        b.push_control(Control::SetThrust(10.0));
        b.push_control(Control::SetThrust(20.0));
        assert!(b.has_pending_controls());
        let k = b.apply_controls(b.kinematics());
        assert_eq!(k.thrust, 20.0);
        assert!(!b.has_pending_controls());
    }

    #[test]
    fn test_trail_request() {
        let b = body(BodyCategory::Dynamic);
        let trail = b
            .equip_trail(EmitterConfig::continuous(SpawnConfig::default(), 10.0))
            .unwrap();
        b.request_trail();
        assert!(b.emitters().get_mut(trail).unwrap().has_request());
        assert!(!b.request_emission(EmitterId(99)));
    }

    #[test]
    fn test_weapons_only_on_players() {
        let b = body(BodyCategory::Dynamic);
        let config = EmitterConfig::continuous(SpawnConfig::projectile("shot", 100.0, 2.0, 1.0), 5.0);
        assert!(matches!(b.add_weapon(config), Err(SimError::WrongCategory { .. })));
    }

    #[test]
    fn test_player_weapons_cycle() {
        let mut player = PlayerState::new(1000.0, 500.0, 30.0);
        assert_eq!(player.select_next_weapon(), None);
        assert!(!player.register_fire_request());

        let config = Arc::new(EmitterConfig::continuous(SpawnConfig::projectile("a", 1.0, 1.0, 1.0), 5.0));
        player.add_weapon(Emitter::new(EmitterId(0), Arc::clone(&config)));
        player.add_weapon(Emitter::new(EmitterId(1), config));
        assert_eq!(player.active_weapon(), Some(0));
        assert_eq!(player.select_next_weapon(), Some(1));
        assert_eq!(player.select_next_weapon(), Some(0));

        assert!(player.register_fire_request());
        assert!(player.must_fire_now(0.016).is_some());
        assert!(player.must_fire_now(0.016).is_none());
    }

    #[test]
    fn test_player_direction_normalised() {
        let player = PlayerState::new(1000.0, 500.0, 30.0);
        let (ax, ay) = player.direction_acceleration(true, false, false, true);
        assert!(((ax * ax + ay * ay).sqrt() - 1000.0).abs() < 1e-9);
        assert!(ax > 0.0 && ay < 0.0);
        assert_eq!(player.direction_acceleration(false, false, false, false), (0.0, 0.0));
        assert_eq!(player.direction_acceleration(false, true, false, false), (0.0, 1000.0));
    }

    #[test]
    fn test_player_status() {
        let mut player = PlayerState::new(1000.0, 500.0, 30.0);
        player.add_score(15);
        let config = Arc::new(EmitterConfig::magazine(SpawnConfig::projectile("a", 1.0, 1.0, 1.0), 5.0, 4, 1.0));
        player.add_weapon(Emitter::new(EmitterId(0), config));
        let status = player.status(BodyId(7));
        assert_eq!(status.id, 7);
        assert_eq!(status.score, 15);
        assert_eq!(status.ammo, vec![1.0]);
        assert_eq!(status.active_weapon, Some(0));
    }
}
