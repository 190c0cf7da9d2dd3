//! Domain events detected during a tick and the actions decided from them.

use crate::components::{BodyCategory, BodyId, BodyRef, LimitEdge};
use crate::emitter::SpawnConfig;
use std::sync::Arc;

/// Whether an emission came from a plain emitter or a player's weapon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitKind {
    Emit,
    Fire,
}

/// Something a body's tick detected.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The body's new position is outside the world on `edge`.
    Limit { body: BodyRef, edge: LimitEdge },
    /// Two bodies overlap. `a` is the body whose tick detected it.
    ///
    /// `immune` is set when one is a projectile still inside its
    /// immunity window against the other, its shooter.
    Collision { a: BodyRef, b: BodyRef, immune: bool },
    /// An emitter or weapon on `body` is due to spawn `spawn`.
    Emit {
        body: BodyRef,
        kind: EmitKind,
        spawn: Arc<SpawnConfig>,
    },
    /// The body outlived its `max_lifetime`.
    LifeOver { body: BodyRef },
}

impl DomainEvent {
    /// Body whose tick produced the event.
    pub fn primary(&self) -> BodyRef {
        match self {
            DomainEvent::Limit { body, .. }
            | DomainEvent::Emit { body, .. }
            | DomainEvent::LifeOver { body } => *body,
            DomainEvent::Collision { a, .. } => *a,
        }
    }
}

/// What an action does to its target body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Commit the integrated snapshot.
    Move,
    /// Bounce off the west edge, now heading east.
    ReboundEast,
    /// Bounce off the east edge, now heading west.
    ReboundWest,
    /// Bounce off the south edge, now heading north.
    ReboundNorth,
    /// Bounce off the north edge, now heading south.
    ReboundSouth,
    MoveToCenter,
    /// Stay at the previous (clamped) position with zero velocity.
    NoMove,
    SpawnBody,
    SpawnProjectile,
    Die,
    /// Reserved.
    GoInside,
    /// Reserved.
    ExplodeInFragments,
}

impl ActionKind {
    /// Actions that commit a position, so no implicit `Move` is needed.
    #[inline]
    pub fn implies_movement(self) -> bool {
        matches!(
            self,
            ActionKind::Move
                | ActionKind::ReboundEast
                | ActionKind::ReboundWest
                | ActionKind::ReboundNorth
                | ActionKind::ReboundSouth
                | ActionKind::MoveToCenter
                | ActionKind::NoMove
        )
    }

    /// Rebound that undoes crossing `edge`.
    pub fn rebound_from(edge: LimitEdge) -> Self {
        match edge {
            LimitEdge::West => ActionKind::ReboundEast,
            LimitEdge::East => ActionKind::ReboundWest,
            LimitEdge::North => ActionKind::ReboundSouth,
            LimitEdge::South => ActionKind::ReboundNorth,
        }
    }
}

/// Directive for one body, produced by the rules.
#[derive(Debug, Clone)]
pub struct Action {
    pub entity_id: BodyId,
    pub category: BodyCategory,
    pub kind: ActionKind,
    pub related_event: Option<DomainEvent>,
}

impl Action {
    pub fn new(target: BodyRef, kind: ActionKind, related_event: Option<DomainEvent>) -> Self {
        Self {
            entity_id: target.id,
            category: target.category,
            kind,
            related_event,
        }
    }

    pub fn target(&self) -> BodyRef {
        BodyRef::new(self.entity_id, self.category)
    }
}
