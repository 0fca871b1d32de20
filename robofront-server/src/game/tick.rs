//! Authoritative Simulation Tick
//!
//! One tick = movement resolution, tick advance, visibility. The order is
//! fixed and everything iterates in id/index order, so two worlds fed the
//! same planned moves stay hash-identical.

use std::collections::BTreeMap;

use crate::core::grid::Coord;
use crate::game::entity::{Entity, EntityId, Move};
use crate::game::movement::{resolve_moves, MovementReport};
use crate::game::tile::Tile;
use crate::game::visibility::{compute_all_views, PlayerView, VisionConfig};
use crate::game::world::World;

/// Match phase once a world exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPhase {
    /// Setup countdown; intervals are burnt without simulating.
    Countdown {
        /// Intervals left before the first simulated tick.
        ticks_remaining: u16,
    },
    /// Ticks are simulated.
    Playing,
}

impl MatchPhase {
    /// Phase right after a game starts.
    pub fn starting(countdown_ticks: u16) -> Self {
        if countdown_ticks == 0 {
            MatchPhase::Playing
        } else {
            MatchPhase::Countdown { ticks_remaining: countdown_ticks }
        }
    }
}

/// Configuration for simulation.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickConfig {
    /// Vision parameters.
    pub vision: VisionConfig,
}

/// Result of a simulated tick.
#[derive(Debug)]
pub struct TickResult {
    /// Tick index after this resolution.
    pub tick: i32,
    /// What movement did.
    pub movement: MovementReport,
    /// Per-player visibility.
    pub views: BTreeMap<u8, PlayerView>,
}

/// Everything one player is sent for a tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerSnapshot {
    /// Owned entities, always in full.
    pub owned: Vec<Entity>,
    /// Visible foreign entities.
    pub foreign: Vec<Entity>,
    /// Visible tiles.
    pub tiles: Vec<(Coord, Tile)>,
}

/// Run one scheduler interval.
///
/// During the countdown this only burns the interval and returns `None`.
pub fn tick(world: &mut World, phase: &mut MatchPhase, config: &TickConfig) -> Option<TickResult> {
    if let MatchPhase::Countdown { ticks_remaining } = *phase {
        let left = ticks_remaining.saturating_sub(1);
        *phase = if left == 0 {
            MatchPhase::Playing
        } else {
            MatchPhase::Countdown { ticks_remaining: left }
        };
        return None;
    }

    // 1. Resolve queued moves (spawns committed inside)
    let movement = resolve_moves(world);

    // 2. Advance tick counter
    world.advance_tick();

    // 3. Visibility, from scratch
    let views = compute_all_views(world, &config.vision);

    Some(TickResult {
        tick: world.tick(),
        movement,
        views,
    })
}

/// Build the snapshot sent to the owner of `view`.
pub fn snapshot(world: &World, view: &PlayerView) -> PlayerSnapshot {
    let owned = world
        .player(view.player)
        .map(|p| {
            p.entities
                .iter()
                .filter_map(|id| world.entity(*id).cloned())
                .collect()
        })
        .unwrap_or_default();

    let foreign = view
        .foreign
        .iter()
        .filter_map(|id| world.entity(*id).cloned())
        .collect();

    let tiles = view.tiles.iter().map(|(c, t)| (*c, *t)).collect();

    PlayerSnapshot { owned, foreign, tiles }
}

/// Queue a move for an entity owned by `player`.
///
/// Returns `false` (and changes nothing) when the entity does not exist or
/// belongs to someone else.
pub fn plan_move(world: &mut World, player: u8, id: EntityId, mv: Move) -> bool {
    match world.entity_mut(id) {
        Some(entity) if entity.owner == Some(player) => {
            entity.upcoming_move = mv;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::{Direction, GridSize};
    use crate::game::entity::EntityType;
    use crate::game::world::Player;

    fn replay_ticks(
        world: &mut World,
        plans: &[Vec<(u8, EntityId, Move)>],
        config: &TickConfig,
    ) -> Vec<TickResult> {
        let mut phase = MatchPhase::Playing;
        let mut results = Vec::with_capacity(plans.len());
        for moves in plans {
            for &(player, id, mv) in moves {
                plan_move(world, player, id, mv);
            }
            if let Some(result) = tick(world, &mut phase, config) {
                results.push(result);
            }
        }
        results
    }

    fn world() -> World {
        let mut world = World::new(GridSize::new(24, 24), 8, Tile::Path, 99);
        world.add_player(Player::new(0, [1; 16], "alice", 0, (0, 0)));
        world.add_player(Player::new(1, [2; 16], "bob", 1, (2, 2)));
        world.spawn_entity(EntityType::Factory, Some(0), Coord::new(4, 4), Direction::East);
        world.spawn_entity(EntityType::Robot, Some(0), Coord::new(5, 4), Direction::East);
        world.spawn_entity(EntityType::Factory, Some(1), Coord::new(20, 20), Direction::West);
        world
    }

    #[test]
    fn test_countdown_burns_intervals() {
        let mut world = world();
        let mut phase = MatchPhase::starting(2);
        let config = TickConfig::default();

        assert!(tick(&mut world, &mut phase, &config).is_none());
        assert_eq!(phase, MatchPhase::Countdown { ticks_remaining: 1 });
        assert!(tick(&mut world, &mut phase, &config).is_none());
        assert_eq!(phase, MatchPhase::Playing);
        assert_eq!(world.tick(), 0);

        let result = tick(&mut world, &mut phase, &config).unwrap();
        assert_eq!(result.tick, 1);
        assert_eq!(world.tick(), 1);
    }

    #[test]
    fn test_zero_countdown_starts_playing() {
        assert_eq!(MatchPhase::starting(0), MatchPhase::Playing);
    }

    #[test]
    fn test_tick_moves_then_sees() {
        let mut world = world();
        let mut phase = MatchPhase::Playing;
        assert!(plan_move(&mut world, 0, 2, Move::Forward));

        let result = tick(&mut world, &mut phase, &TickConfig::default()).unwrap();

        assert_eq!(result.movement.moved, 1);
        let view = &result.views[&0];
        assert!(view.tiles.contains_key(&Coord::new(6, 4)));
        assert!(view.tiles.contains_key(&Coord::new(13, 4)));
    }

    #[test]
    fn test_plan_move_rejects_foreign_entity() {
        let mut world = world();
        assert!(!plan_move(&mut world, 1, 2, Move::Forward));
        assert!(!plan_move(&mut world, 0, 999, Move::Forward));
        assert_eq!(world.entity(2).unwrap().upcoming_move, Move::Idle);
    }

    #[test]
    fn test_snapshot_contains_all_owned() {
        let mut world = world();
        let mut phase = MatchPhase::Playing;
        let result = tick(&mut world, &mut phase, &TickConfig::default()).unwrap();

        let snap = snapshot(&world, &result.views[&0]);
        assert_eq!(snap.owned.len(), 2);
        assert!(snap.foreign.is_empty());

        let snap = snapshot(&world, &result.views[&1]);
        assert_eq!(snap.owned.len(), 1);
    }

    #[test]
    fn test_replay_determinism() {
        let plans = vec![
            vec![(0, 2, Move::Forward)],
            vec![(0, 2, Move::RotateCW), (0, 1, Move::Build)],
            vec![(0, 2, Move::Forward)],
            vec![],
            vec![(0, 2, Move::Forward), (1, 3, Move::RotateCCW)],
        ];

        let mut a = world();
        let mut b = world();
        let config = TickConfig::default();
        let ra = replay_ticks(&mut a, &plans, &config);
        let rb = replay_ticks(&mut b, &plans, &config);

        assert_eq!(ra.len(), 5);
        assert_eq!(rb.len(), 5);
        assert_eq!(a.tick(), 5);
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.entity(2).unwrap().pos, Coord::new(6, 6));
    }
}
