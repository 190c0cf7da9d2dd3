//! Emitters: cooldown, burst and ammo logic for anything that spawns bodies.
//!
//! The same [`Emitter`] drives trails on dynamic bodies, generic emitters
//! and player weapons. Requests are registered from any thread; the owning
//! body's tick asks [`Emitter::must_emit_now`] once per tick.

use crate::components::{BodyCategory, EmitterId};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Template for a body produced by an emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    pub category: BodyCategory,
    /// Visual key forwarded to the lifecycle observer.
    pub asset_id: String,
    pub size: f64,
    /// Distance ahead of the spawner along its heading.
    pub forward_offset: f64,
    /// Distance to the left of the heading.
    pub side_offset: f64,
    /// Initial speed along the heading.
    pub speed: f64,
    /// Initial acceleration along the heading.
    pub acceleration: f64,
    pub angular_speed: f64,
    pub angular_acceleration: f64,
    pub thrust: f64,
    pub mass: f64,
    /// Seconds to live, or -1 for forever.
    pub max_lifetime: f64,
    pub random_angle: bool,
    pub random_size: bool,
    /// Add the spawner's velocity to the spawned body's.
    pub add_emitter_speed: bool,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            category: BodyCategory::Dynamic,
            asset_id: String::new(),
            size: 4.0,
            forward_offset: 0.0,
            side_offset: 0.0,
            speed: 0.0,
            acceleration: 0.0,
            angular_speed: 0.0,
            angular_acceleration: 0.0,
            thrust: 0.0,
            mass: 0.0,
            max_lifetime: -1.0,
            random_angle: false,
            random_size: false,
            add_emitter_speed: false,
        }
    }
}

impl SpawnConfig {
    /// Projectile template with the given speed, size and lifetime.
    pub fn projectile(asset_id: impl Into<String>, speed: f64, size: f64, max_lifetime: f64) -> Self {
        Self {
            category: BodyCategory::Projectile,
            asset_id: asset_id.into(),
            speed,
            size,
            max_lifetime,
            add_emitter_speed: true,
            ..Default::default()
        }
    }

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
        Ok(())
    }
}

/// Emission timing and ammunition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub spawn: Arc<SpawnConfig>,
    /// Emissions per second outside a burst.
    pub emission_rate: f64,
    /// When false, `max_bodies_emitted` is a magazine that reloads.
    pub unlimited: bool,
    pub max_bodies_emitted: u32,
    /// Emissions per second inside a burst. 0 disables bursts.
    pub burst_emission_rate: f64,
    /// Emissions per burst. 1 or less disables bursts.
    pub burst_size: u32,
    /// Seconds to refill an empty magazine.
    pub reload_time: f64,
}

impl EmitterConfig {
    /// Unlimited emitter firing at `emission_rate` per second.
    pub fn continuous(spawn: SpawnConfig, emission_rate: f64) -> Self {
        Self {
            spawn: Arc::new(spawn),
            emission_rate,
            unlimited: true,
            max_bodies_emitted: 0,
            burst_emission_rate: 0.0,
            burst_size: 0,
            reload_time: 0.0,
        }
    }

    /// Limited magazine of `magazine` bodies, refilled after `reload_time`.
    pub fn magazine(spawn: SpawnConfig, emission_rate: f64, magazine: u32, reload_time: f64) -> Self {
        Self {
            unlimited: false,
            max_bodies_emitted: magazine,
            reload_time,
            ..Self::continuous(spawn, emission_rate)
        }
    }

    pub fn with_burst(mut self, burst_size: u32, burst_emission_rate: f64) -> Self {
        self.burst_size = burst_size;
        self.burst_emission_rate = burst_emission_rate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.spawn.validate()?;
        if !(self.emission_rate > 0.0) {
            return Err(SimError::InvalidEmitter(format!(
                "emission_rate must be positive, got {}",
                self.emission_rate
            )));
        }
        if self.burst_emission_rate < 0.0 {
            return Err(SimError::InvalidEmitter("burst_emission_rate must not be negative".into()));
        }
        if self.reload_time < 0.0 {
            return Err(SimError::InvalidEmitter("reload_time must not be negative".into()));
        }
        Ok(())
    }

    #[inline]
    fn bursts(&self) -> bool {
        self.burst_size > 1 && self.burst_emission_rate > 0.0
    }
}

/// Whether an emitter can fire or is refilling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmitterState {
    Ready,
    Reloading,
}

/// Runtime state of one emitter.
#[derive(Debug, Clone)]
pub struct Emitter {
    id: EmitterId,
    config: Arc<EmitterConfig>,
    state: EmitterState,
    cooldown: f64,
    remaining: u32,
    burst_remaining: u32,
    request_pending: bool,
}

impl Emitter {
    pub fn new(id: EmitterId, config: Arc<EmitterConfig>) -> Self {
        let remaining = config.max_bodies_emitted;
        Self {
            id,
            config,
            state: EmitterState::Ready,
            cooldown: 0.0,
            remaining,
            burst_remaining: 0,
            request_pending: false,
        }
    }

    pub fn id(&self) -> EmitterId {
        self.id
    }

    pub fn config(&self) -> &Arc<EmitterConfig> {
        &self.config
    }

    pub fn spawn(&self) -> &Arc<SpawnConfig> {
        &self.config.spawn
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Ask for an emission on the next tick that allows it.
    pub fn register_request(&mut self) {
        self.request_pending = true;
    }

    pub fn has_request(&self) -> bool {
        self.request_pending
    }

    /// Fraction of the magazine left. Unlimited emitters report 1.
    pub fn ammo_ratio(&self) -> f64 {
        if self.config.unlimited || self.config.max_bodies_emitted == 0 {
            1.0
        } else {
            self.remaining as f64 / self.config.max_bodies_emitted as f64
        }
    }

    /// Advance by `dt` seconds and decide whether to emit this tick.
    pub fn must_emit_now(&mut self, dt: f64) -> bool {
        if self.cooldown > 0.0 {
            self.cooldown -= dt;
            self.request_pending = false;
            return false;
        }

        if !self.config.unlimited && self.remaining == 0 {
            self.state = EmitterState::Reloading;
            self.request_pending = false;
            self.burst_remaining = 0;
            self.cooldown = self.config.reload_time;
            self.remaining = self.config.max_bodies_emitted;
            return false;
        }
        self.state = EmitterState::Ready;

        if self.burst_remaining > 0 {
            self.request_pending = false;
            self.burst_remaining -= 1;
            self.consume_ammo();
            self.cooldown = if self.burst_remaining == 0 {
                1.0 / self.config.emission_rate
            } else {
                1.0 / self.config.burst_emission_rate
            };
            return true;
        }

        if !self.request_pending {
            self.cooldown = 0.0;
            return false;
        }

        if self.config.bursts() {
            // This shot is the first of the burst
            self.burst_remaining = self.config.burst_size - 1;
        }
        self.cooldown = 1.0 / self.config.emission_rate;
        self.consume_ammo();
        self.request_pending = false;
        true
    }

    #[inline]
    fn consume_ammo(&mut self) {
        if !self.config.unlimited {
            self.remaining = self.remaining.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter(config: EmitterConfig) -> Emitter {
        config.validate().unwrap();
        Emitter::new(EmitterId(0), Arc::new(config))
    }

    fn shot() -> SpawnConfig {
        SpawnConfig::projectile("bullet", 300.0, 2.0, 1.0)
    }

    #[test]
    fn test_no_request_no_emission() {
        let mut e = emitter(EmitterConfig::continuous(shot(), 10.0));
        assert!(!e.must_emit_now(0.016));
    }

    #[test]
    fn test_request_then_cooldown() {
        let mut e = emitter(EmitterConfig::continuous(shot(), 10.0));
        e.register_request();
        assert!(e.must_emit_now(0.016));
        assert!(!e.has_request());

        // Cooldown of 0.1s eats requests while it runs
        e.register_request();
        assert!(!e.must_emit_now(0.05));
        assert!(!e.has_request());
        e.register_request();
        assert!(!e.must_emit_now(0.06));
        e.register_request();
        assert!(e.must_emit_now(0.016));
    }

    #[test]
    fn test_magazine_empties_and_reloads() {
        let mut e = emitter(EmitterConfig::magazine(shot(), 1000.0, 2, 0.5));
        for _ in 0..2 {
            e.register_request();
            assert!(e.must_emit_now(0.0));
            // Burn the cooldown
            e.must_emit_now(1.0);
        }
        assert_eq!(e.remaining(), 0);
        assert_eq!(e.ammo_ratio(), 0.0);

        // Empty: the request is swallowed and the reload starts
        e.register_request();
        assert!(!e.must_emit_now(0.0));
        assert_eq!(e.state(), EmitterState::Reloading);
        assert_eq!(e.remaining(), 2);

        // Still reloading
        e.register_request();
        assert!(!e.must_emit_now(0.6));
        e.register_request();
        assert!(e.must_emit_now(0.0));
        assert_eq!(e.state(), EmitterState::Ready);
    }

    #[test]
    fn test_burst_waits_a_full_period_after_first_shot() {
        let config = EmitterConfig::continuous(shot(), 1.0).with_burst(3, 100.0);
        let mut e = emitter(config);
        e.register_request();
        assert!(e.must_emit_now(0.0));

        let fired = (0..20).filter(|_| e.must_emit_now(0.005)).count();
        assert_eq!(fired, 0);
        assert!(e.cooldown > 0.85);
    }

    #[test]
    fn test_burst_fires_without_new_requests() {
        let config = EmitterConfig::continuous(shot(), 1.0).with_burst(3, 100.0);
        let mut e = emitter(config);
        e.register_request();
        assert!(e.must_emit_now(0.0));

        // One emission period before the rest of the burst
        assert!(!e.must_emit_now(0.5));
        assert!(!e.must_emit_now(0.5));
        assert!(e.must_emit_now(0.0));
        // Burst spacing between the remaining shots
        assert!(!e.must_emit_now(0.01));
        assert!(e.must_emit_now(0.0));

        // Burst done: back to the emission period, and nothing without a request
        assert!(!e.must_emit_now(0.5));
        assert!(!e.must_emit_now(0.5));
        assert!(!e.must_emit_now(0.0));
    }

    #[test]
    fn test_validation() {
        let mut bad = EmitterConfig::continuous(shot(), 0.0);
        assert!(matches!(bad.validate(), Err(SimError::InvalidEmitter(_))));

        bad.emission_rate = 5.0;
        let mut spawn = shot();
        spawn.max_lifetime = 0.0;
        bad.spawn = Arc::new(spawn);
        assert!(matches!(bad.validate(), Err(SimError::InvalidLifetime(_))));

        let mut spawn = shot();
        spawn.size = 0.0;
        assert!(matches!(spawn.validate(), Err(SimError::InvalidSize(_))));
    }

    #[test]
    fn test_unlimited_ratio() {
        let e = emitter(EmitterConfig::continuous(shot(), 5.0));
        assert_eq!(e.ammo_ratio(), 1.0);
    }
}
