//! Deciding and executing actions for one body's tick.
//!
//! Actions aimed at the ticking body are applied to a working snapshot that
//! is committed once at the end. Actions aimed at anyone else are queued on
//! the target and run during the target's own tick, so no thread ever
//! writes another batch's bodies.

use crate::body::{Body, BodySpec};
use crate::components::{BodyCategory, Kinematics};
use crate::emitter::SpawnConfig;
use crate::error::Result;
use crate::events::{Action, ActionKind, DomainEvent};
use crate::store::{footprint, SimulationStore};
use crate::systems::movement::{self, Rebound};
use rand::Rng;
use std::sync::Arc;
use tracing::{trace, warn};

/// Build the action list: queued external actions first, then whatever the
/// rules decide, then an implicit `Move` if nothing else moves the body.
pub(crate) fn decide(
    store: &SimulationStore,
    body: &Body,
    events: &[DomainEvent],
    actions: &mut Vec<Action>,
) -> Result<()> {
    body.drain_inbox_into(actions);
    if !events.is_empty() {
        store.rules.provide_actions(events, actions);
    }

    let moves = actions
        .iter()
        .any(|a| a.entity_id == body.id() && a.kind.implies_movement());
    if !moves {
        actions.push(Action::new(body.body_ref(), ActionKind::Move, None));
    }
    Ok(())
}

/// Apply `actions` in order.
pub(crate) fn execute(
    store: &SimulationStore,
    body: &Arc<Body>,
    actions: &[Action],
    new: &Kinematics,
    old: &Kinematics,
    cells: &mut Vec<usize>,
) -> Result<()> {
    let width = store.config.world_width;
    let height = store.config.world_height;
    let mut working = *new;
    let mut moved = false;

    for action in actions {
        if action.entity_id != body.id() {
            match store.body(action.entity_id) {
                Some(target) => target.enqueue_external_action(action.clone()),
                None => trace!(target = %action.entity_id, kind = ?action.kind, "action target gone"),
            }
            continue;
        }
        if body.is_dead() {
            break;
        }

        match action.kind {
            ActionKind::Move => moved = true,
            ActionKind::ReboundEast => moved |= bounce(body, &mut working, Rebound::East, width, height),
            ActionKind::ReboundWest => moved |= bounce(body, &mut working, Rebound::West, width, height),
            ActionKind::ReboundNorth => moved |= bounce(body, &mut working, Rebound::North, width, height),
            ActionKind::ReboundSouth => moved |= bounce(body, &mut working, Rebound::South, width, height),
            ActionKind::MoveToCenter => {
                working = movement::move_to_center(&working, width, height);
                moved = true;
            }
            ActionKind::NoMove => {
                working = movement::freeze(old, new.timestamp_ns, width, height);
                moved = true;
            }
            ActionKind::SpawnBody | ActionKind::SpawnProjectile => spawn(store, body, &working, action)?,
            ActionKind::Die => {
                store.remove_body(body);
            }
            ActionKind::GoInside | ActionKind::ExplodeInFragments => {}
        }
    }

    if moved && !body.is_dead() {
        body.commit(working, &store.pool);
        if working.pos_x != new.pos_x || working.pos_y != new.pos_y {
            store.grid.upsert(body.id(), footprint(&working), cells)?;
        }
    }
    Ok(())
}

/// Rebound only bodies whose integrator allows it.
fn bounce(body: &Body, working: &mut Kinematics, towards: Rebound, width: f64, height: f64) -> bool {
    if !body.integrator().is_reboundable() {
        return false;
    }
    *working = movement::rebound(working, towards, width, height);
    true
}

/// Create the body described by the action's emit event, relative to the
/// spawner's current snapshot.
fn spawn(store: &SimulationStore, spawner: &Body, at: &Kinematics, action: &Action) -> Result<()> {
    let Some(DomainEvent::Emit { spawn, .. }) = &action.related_event else {
        warn!(body = %spawner.id(), kind = ?action.kind, "spawn action without an emit event");
        return Ok(());
    };

    let spec = spawn_spec(store, spawner, at, spawn, &mut rand::thread_rng());
    let Some(child) = store.add_body(&spec)? else {
        return Ok(());
    };

    if child.category().is_static() {
        store.observer.new_static(child.id(), child.asset_id());
    } else {
        store.observer.new_dynamic(child.id(), child.asset_id());
    }
    trace!(spawner = %spawner.id(), child = %child.id(), "body spawned");
    Ok(())
}

pub(crate) fn spawn_spec<R: Rng>(
    store: &SimulationStore,
    spawner: &Body,
    at: &Kinematics,
    spawn: &SpawnConfig,
    rng: &mut R,
) -> BodySpec {
    let (dx, dy) = at.heading();
    // Left normal of the heading
    let (nx, ny) = (-dy, dx);
    let pos_x = at.pos_x + dx * spawn.forward_offset + nx * spawn.side_offset;
    let pos_y = at.pos_y + dy * spawn.forward_offset + ny * spawn.side_offset;

    let mut speed_x = spawn.speed * dx;
    let mut speed_y = spawn.speed * dy;
    if spawn.add_emitter_speed {
        speed_x += at.speed_x;
        speed_y += at.speed_y;
    }

    let angle = if spawn.random_angle {
        rng.gen_range(0.0..360.0)
    } else {
        at.angle
    };

    let mut size = spawn.size;
    if spawn.random_size {
        let (lo, hi) = store.config.spawn_size_jitter;
        size *= jitter(rng, lo, hi);
    }

    let mut max_lifetime = spawn.max_lifetime;
    if max_lifetime > 0.0 {
        let (lo, hi) = store.config.lifetime_jitter;
        max_lifetime *= jitter(rng, lo, hi);
    }

    BodySpec {
        category: spawn.category,
        asset_id: spawn.asset_id.clone(),
        pos_x,
        pos_y,
        size,
        speed_x,
        speed_y,
        acc_x: spawn.acceleration * dx,
        acc_y: spawn.acceleration * dy,
        angle,
        angular_speed: spawn.angular_speed,
        angular_acc: spawn.angular_acceleration,
        thrust: spawn.thrust,
        mass: spawn.mass,
        max_lifetime,
        shooter: (spawn.category == BodyCategory::Projectile).then_some(spawner.id()),
    }
}

#[inline]
fn jitter<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}
