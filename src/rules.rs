//! Stock rule sets.
//!
//! Hosts normally plug in their own [`RuleEngine`]; these cover the common
//! arcade policies and are what the demo and tests run with.
//!
//! | Rule set               | Limit                     | Collision                          |
//! |------------------------|---------------------------|------------------------------------|
//! | [`LimitRebound`]       | rebound                   | ignored                            |
//! | [`ReboundAndCollision`]| rebound                   | both die (not decorators, immune)  |
//! | [`InLimitsGoToCenter`] | move to centre            | ignored                            |
//! | [`DeadInLimits`]       | die (players stop)        | both die (players stop instead)    |
//!
//! All of them spawn on emit/fire events and kill on life over.

use crate::components::{BodyCategory, BodyRef};
use crate::events::{Action, ActionKind, DomainEvent, EmitKind};
use crate::ports::RuleEngine;

/// Handle the events every stock rule set treats the same way.
/// Returns true when the event was consumed.
fn common_rules(event: &DomainEvent, actions: &mut Vec<Action>) -> bool {
    match event {
        DomainEvent::LifeOver { body } => {
            actions.push(Action::new(*body, ActionKind::Die, Some(event.clone())));
            true
        }
        DomainEvent::Emit { body, kind, .. } => {
            let action = match kind {
                EmitKind::Emit => ActionKind::SpawnBody,
                EmitKind::Fire => ActionKind::SpawnProjectile,
            };
            actions.push(Action::new(*body, action, Some(event.clone())));
            true
        }
        _ => false,
    }
}

fn both_die(a: BodyRef, b: BodyRef, event: &DomainEvent, actions: &mut Vec<Action>) {
    actions.push(Action::new(a, ActionKind::Die, Some(event.clone())));
    actions.push(Action::new(b, ActionKind::Die, Some(event.clone())));
}

/// Bounce off world edges; collisions pass through.
#[derive(Debug, Default, Clone, Copy)]
pub struct LimitRebound;

impl RuleEngine for LimitRebound {
    fn provide_actions(&self, events: &[DomainEvent], actions: &mut Vec<Action>) {
        for event in events {
            if common_rules(event, actions) {
                continue;
            }
            if let DomainEvent::Limit { body, edge } = event {
                actions.push(Action::new(*body, ActionKind::rebound_from(*edge), Some(event.clone())));
            }
        }
    }
}

/// Bounce off world edges; colliding bodies destroy each other.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReboundAndCollision;

impl RuleEngine for ReboundAndCollision {
    fn provide_actions(&self, events: &[DomainEvent], actions: &mut Vec<Action>) {
        for event in events {
            if common_rules(event, actions) {
                continue;
            }
            match event {
                DomainEvent::Limit { body, edge } => {
                    actions.push(Action::new(*body, ActionKind::rebound_from(*edge), Some(event.clone())));
                }
                DomainEvent::Collision { a, b, immune } => {
                    let decorative = a.category == BodyCategory::Decorator
                        || b.category == BodyCategory::Decorator;
                    if !decorative && !immune {
                        both_die(*a, *b, event, actions);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Anything leaving the world is parked at its centre.
#[derive(Debug, Default, Clone, Copy)]
pub struct InLimitsGoToCenter;

impl RuleEngine for InLimitsGoToCenter {
    fn provide_actions(&self, events: &[DomainEvent], actions: &mut Vec<Action>) {
        for event in events {
            if common_rules(event, actions) {
                continue;
            }
            if let DomainEvent::Limit { body, .. } = event {
                actions.push(Action::new(*body, ActionKind::MoveToCenter, Some(event.clone())));
            }
        }
    }
}

/// Leaving the world or colliding is fatal, except for players, who are
/// stopped in place instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadInLimits;

impl RuleEngine for DeadInLimits {
    fn provide_actions(&self, events: &[DomainEvent], actions: &mut Vec<Action>) {
        for event in events {
            if common_rules(event, actions) {
                continue;
            }
            match event {
                DomainEvent::Limit { body, .. } => {
                    let kind = if body.category == BodyCategory::Player {
                        ActionKind::NoMove
                    } else {
                        ActionKind::Die
                    };
                    actions.push(Action::new(*body, kind, Some(event.clone())));
                }
                DomainEvent::Collision { a, b, immune } => {
                    if *immune {
                        continue;
                    }
                    if a.category == BodyCategory::Player {
                        actions.push(Action::new(*a, ActionKind::NoMove, Some(event.clone())));
                    } else if b.category == BodyCategory::Player {
                        actions.push(Action::new(*b, ActionKind::NoMove, Some(event.clone())));
                    } else {
                        both_die(*a, *b, event, actions);
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BodyId, LimitEdge};
    use crate::emitter::SpawnConfig;
    use std::sync::Arc;

    fn r(id: u64, category: BodyCategory) -> BodyRef {
        BodyRef::new(BodyId(id), category)
    }

    fn kinds(rules: &dyn RuleEngine, events: &[DomainEvent]) -> Vec<(BodyId, ActionKind)> {
        let mut actions = Vec::new();
        rules.provide_actions(events, &mut actions);
        actions.iter().map(|a| (a.entity_id, a.kind)).collect()
    }

    #[test]
    fn test_limit_rebound() {
        let body = r(1, BodyCategory::Dynamic);
        let events = [
            DomainEvent::Limit { body, edge: LimitEdge::West },
            DomainEvent::Collision { a: body, b: r(2, BodyCategory::Dynamic), immune: false },
        ];
        assert_eq!(kinds(&LimitRebound, &events), vec![(BodyId(1), ActionKind::ReboundEast)]);
    }

    #[test]
    fn test_common_spawn_and_life_over() {
        let body = r(1, BodyCategory::Player);
        let spawn = Arc::new(SpawnConfig::default());
        let events = [
            DomainEvent::Emit { body, kind: EmitKind::Emit, spawn: Arc::clone(&spawn) },
            DomainEvent::Emit { body, kind: EmitKind::Fire, spawn },
            DomainEvent::LifeOver { body },
        ];
        for rules in [&LimitRebound as &dyn RuleEngine, &ReboundAndCollision, &InLimitsGoToCenter, &DeadInLimits] {
            assert_eq!(
                kinds(rules, &events),
                vec![
                    (BodyId(1), ActionKind::SpawnBody),
                    (BodyId(1), ActionKind::SpawnProjectile),
                    (BodyId(1), ActionKind::Die),
                ]
            );
        }
    }

    #[test]
    fn test_rebound_and_collision() {
        let a = r(1, BodyCategory::Dynamic);
        let b = r(2, BodyCategory::Projectile);
        let deco = r(3, BodyCategory::Decorator);

        let hit = [DomainEvent::Collision { a, b, immune: false }];
        assert_eq!(
            kinds(&ReboundAndCollision, &hit),
            vec![(BodyId(1), ActionKind::Die), (BodyId(2), ActionKind::Die)]
        );

        let immune = [DomainEvent::Collision { a, b, immune: true }];
        assert!(kinds(&ReboundAndCollision, &immune).is_empty());

        let decorative = [DomainEvent::Collision { a, b: deco, immune: false }];
        assert!(kinds(&ReboundAndCollision, &decorative).is_empty());
    }

    #[test]
    fn test_go_to_center() {
        let body = r(5, BodyCategory::Dynamic);
        let events = [DomainEvent::Limit { body, edge: LimitEdge::South }];
        assert_eq!(kinds(&InLimitsGoToCenter, &events), vec![(BodyId(5), ActionKind::MoveToCenter)]);
    }

    #[test]
    fn test_dead_in_limits_spares_players() {
        let player = r(1, BodyCategory::Player);
        let rock = r(2, BodyCategory::Dynamic);
        let events = [
            DomainEvent::Limit { body: player, edge: LimitEdge::North },
            DomainEvent::Limit { body: rock, edge: LimitEdge::North },
            DomainEvent::Collision { a: rock, b: player, immune: false },
        ];
        assert_eq!(
            kinds(&DeadInLimits, &events),
            vec![
                (BodyId(1), ActionKind::NoMove),
                (BodyId(2), ActionKind::Die),
                (BodyId(1), ActionKind::NoMove),
            ]
        );
    }
}
