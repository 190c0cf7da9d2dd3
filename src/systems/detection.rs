//! Event detection for one body's tick.
//!
//! Order is fixed: limits, collisions, emitters, weapon fire, life over.

use crate::body::{Body, Scratch};
use crate::clock::secs_between;
use crate::components::{circles_intersect, BodyCategory, Kinematics, LimitEdge};
use crate::error::Result;
use crate::events::{DomainEvent, EmitKind};
use crate::store::SimulationStore;
use std::sync::Arc;

/// Emitter step used when the clock did not move between two ticks.
const MIN_EMITTER_DT: f64 = 0.001;

/// Fill `scratch.events` with everything that happened to `body` between
/// `old` and `new`.
pub(crate) fn detect(
    store: &SimulationStore,
    body: &Arc<Body>,
    new: &Kinematics,
    old: &Kinematics,
    scratch: &mut Scratch,
) -> Result<()> {
    if body.category().is_moving() {
        check_limits(store, body, new, &mut scratch.events);
        check_collisions(store, body, new, scratch);
    }

    let mut dt = secs_between(old.timestamp_ns, new.timestamp_ns);
    if dt <= 0.0 {
        dt = MIN_EMITTER_DT;
    }
    check_emitters(body, dt, &mut scratch.events);
    check_fire(body, dt, &mut scratch.events);

    if body.is_life_over(new.timestamp_ns) {
        scratch.events.push(DomainEvent::LifeOver { body: body.body_ref() });
    }
    Ok(())
}

fn check_limits(store: &SimulationStore, body: &Body, k: &Kinematics, events: &mut Vec<DomainEvent>) {
    let width = store.config.world_width;
    let height = store.config.world_height;
    let mut push = |edge| events.push(DomainEvent::Limit { body: body.body_ref(), edge });

    if k.pos_x < 0.0 {
        push(LimitEdge::West);
    }
    if k.pos_x >= width {
        push(LimitEdge::East);
    }
    if k.pos_y < 0.0 {
        push(LimitEdge::North);
    }
    if k.pos_y >= height {
        push(LimitEdge::South);
    }
}

fn check_collisions(store: &SimulationStore, body: &Body, k: &Kinematics, scratch: &mut Scratch) {
    let Scratch { candidates, seen, events, .. } = scratch;
    candidates.clear();
    seen.clear();

    store.grid.query_collision_candidates(body.id(), candidates);
    for &other_id in candidates.iter() {
        if !seen.insert(other_id) {
            continue;
        }
        let Some(other) = store.collidable(other_id) else {
            continue;
        };
        // Gravity bodies never detect, so only moving pairs need halving
        if other.category() != BodyCategory::Gravity && body.id() >= other_id {
            continue;
        }
        if !circles_intersect(k, &other.kinematics()) {
            continue;
        }

        let immune = is_immune(store, body, &other, k.timestamp_ns);
        events.push(DomainEvent::Collision {
            a: body.body_ref(),
            b: other.body_ref(),
            immune,
        });
    }
}

/// A projectile cannot hurt its own shooter while it is young.
fn is_immune(store: &SimulationStore, a: &Body, b: &Body, now_ns: u64) -> bool {
    let (projectile, target) = if a.category() == BodyCategory::Projectile {
        (a, b)
    } else if b.category() == BodyCategory::Projectile {
        (b, a)
    } else {
        return false;
    };
    projectile.shooter() == Some(target.id())
        && projectile.age(now_ns) < store.config.projectile_immunity_secs
}

fn check_emitters(body: &Body, dt: f64, events: &mut Vec<DomainEvent>) {
    let mut set = body.emitters();
    for emitter in set.list.iter_mut() {
        if emitter.must_emit_now(dt) {
            events.push(DomainEvent::Emit {
                body: body.body_ref(),
                kind: EmitKind::Emit,
                spawn: Arc::clone(emitter.spawn()),
            });
        }
    }
}

fn check_fire(body: &Body, dt: f64, events: &mut Vec<DomainEvent>) {
    let Some(player) = body.player() else {
        return;
    };
    if let Some(spawn) = player.lock().must_fire_now(dt) {
        events.push(DomainEvent::Emit {
            body: body.body_ref(),
            kind: EmitKind::Fire,
            spawn,
        });
    }
}
