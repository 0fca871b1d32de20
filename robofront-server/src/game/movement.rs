//! Movement Resolution
//!
//! Applies every entity's queued move exactly once per tick, in id order.
//! Spawns produced by Build are committed after the pass, and every
//! entity's upcoming move is reset to Idle at the end regardless of outcome.

use crate::game::entity::{EntityId, EntityType, Move, BUILD_PRICE};
use crate::game::tile::{Tile, MAX_EROSION_STAGE};
use crate::game::world::World;

/// Counters describing what one resolution pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MovementReport {
    /// Entities that turned.
    pub rotated: u32,
    /// Entities that stepped onto a new cell.
    pub moved: u32,
    /// Forward moves refused by a blocking tile.
    pub blocked: u32,
    /// Tiles eroded by one stage (including the final stage).
    pub eroded: u32,
    /// Resources harvested from crystal.
    pub harvested: u32,
    /// Resource transfers into a factory.
    pub transfers: u32,
    /// New entities queued by Build.
    pub built: Vec<EntityId>,
}

/// Resolve all queued moves for one tick.
pub fn resolve_moves(world: &mut World) -> MovementReport {
    let mut report = MovementReport::default();

    for id in world.entity_ids() {
        let Some(planned) = world.entity(id).map(|e| e.upcoming_move) else {
            continue;
        };
        match planned {
            Move::Idle => {}
            Move::RotateCW | Move::RotateCCW => resolve_rotation(world, id, &mut report),
            Move::Forward => resolve_forward(world, id, &mut report),
            Move::Build => resolve_build(world, id, &mut report),
        }
    }

    world.commit_spawns();

    for id in world.entity_ids() {
        if let Some(entity) = world.entity_mut(id) {
            entity.upcoming_move = Move::Idle;
        }
    }

    report
}

fn resolve_rotation(world: &mut World, id: EntityId, report: &mut MovementReport) {
    if let Some(entity) = world.entity_mut(id) {
        entity.facing = match entity.upcoming_move {
            Move::RotateCW => entity.facing.rotate_cw(),
            _ => entity.facing.rotate_ccw(),
        };
        report.rotated += 1;
    }
}

fn resolve_forward(world: &mut World, id: EntityId, report: &mut MovementReport) {
    let Some(entity) = world.entity(id) else {
        return;
    };
    let (dx, dy) = entity.facing.offset();
    let target = world.size().wrap(entity.pos.x + dx, entity.pos.y + dy);

    match world.tile(target) {
        Tile::Rock => {
            report.blocked += 1;
        }
        Tile::Dirt(stage) => {
            let next = if stage >= MAX_EROSION_STAGE { Tile::Path } else { Tile::Dirt(stage + 1) };
            world.set_tile(target, next);
            report.eroded += 1;
        }
        Tile::Crystal(stage) => {
            report.eroded += 1;
            if stage >= MAX_EROSION_STAGE {
                world.set_tile(target, Tile::Path);
                if let Some(entity) = world.entity_mut(id) {
                    entity.resources = entity.resources.saturating_add(1);
                    report.harvested += 1;
                }
            } else {
                world.set_tile(target, Tile::Crystal(stage + 1));
            }
        }
        Tile::Path => {
            world.move_entity(id, target);
            report.moved += 1;
            if deliver_to_factory(world, id) {
                report.transfers += 1;
            }
        }
    }
}

/// Hand the mover's resources to a same-team factory sharing its cell.
fn deliver_to_factory(world: &mut World, id: EntityId) -> bool {
    let Some(mover) = world.entity(id) else {
        return false;
    };
    if mover.resources <= 0 {
        return false;
    }
    let Some(team) = mover.owner.and_then(|owner| world.team_of(owner)) else {
        return false;
    };

    let factory = world
        .entities_at(mover.pos)
        .filter(|e| e.id != id && e.kind == EntityType::Factory)
        .find(|e| e.owner.and_then(|owner| world.team_of(owner)) == Some(team))
        .map(|e| e.id);
    let Some(factory_id) = factory else {
        return false;
    };

    let amount = mover.resources;
    if let Some(mover) = world.entity_mut(id) {
        mover.resources = 0;
    }
    if let Some(factory) = world.entity_mut(factory_id) {
        factory.resources = factory.resources.saturating_add(amount);
    }
    true
}

fn resolve_build(world: &mut World, id: EntityId, report: &mut MovementReport) {
    let Some(entity) = world.entity_mut(id) else {
        return;
    };
    if entity.kind != EntityType::Factory || entity.resources < BUILD_PRICE {
        return;
    }
    entity.resources -= BUILD_PRICE;

    let (dx, dy) = entity.facing.offset();
    let target = entity.pos.offset(dx, dy);
    let (owner, facing) = (entity.owner, entity.facing);
    let new_id = world.queue_spawn(EntityType::Robot, owner, target, facing);
    report.built.push(new_id);
}
