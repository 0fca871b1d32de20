//! Fog of War
//!
//! Per-player visibility, rebuilt from nothing every tick. For each owned
//! entity a cell is a candidate when it is inside the omni radius, or inside
//! the directional radius and within the half field of view of the entity's
//! facing. A candidate is revealed only when line of sight holds along the
//! direct line or one of two axis-shifted alternates.

use std::collections::{BTreeMap, BTreeSet};
use std::f32::consts::FRAC_PI_4;

use crate::core::grid::{supercover_line, wrap_angle, Coord, Direction};
use crate::game::entity::{Entity, EntityId};
use crate::game::tile::Tile;
use crate::game::world::World;

// =============================================================================
// CONFIG
// =============================================================================

/// Vision parameters shared by every entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisionConfig {
    /// Radius seen regardless of facing (cells).
    pub omni_radius: i32,
    /// Radius of the forward cone (cells).
    pub directional_radius: i32,
    /// Half-angle of the forward cone (radians).
    pub half_fov: f32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            omni_radius: 3,
            directional_radius: 7,
            half_fov: FRAC_PI_4,
        }
    }
}

impl VisionConfig {
    /// Largest radius either mode can reach.
    #[inline]
    pub fn max_radius(&self) -> i32 {
        self.omni_radius.max(self.directional_radius)
    }

    /// Whether a cell at offset `(dx, dy)` passes the distance/angle tests.
    pub fn is_candidate(&self, dx: i32, dy: i32, facing: Direction) -> bool {
        let dist_sq = dx * dx + dy * dy;
        if dist_sq <= self.omni_radius * self.omni_radius {
            return true;
        }
        if dist_sq > self.directional_radius * self.directional_radius {
            return false;
        }
        let angle = (dy as f32).atan2(dx as f32);
        wrap_angle(angle - facing.angle()).abs() < self.half_fov
    }
}

// =============================================================================
// VIEW
// =============================================================================

/// Everything one player sees this tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerView {
    /// Player index.
    pub player: u8,
    /// Seen tiles, each coordinate once (first value wins).
    pub tiles: BTreeMap<Coord, Tile>,
    /// Seen entities not owned by this player.
    pub foreign: BTreeSet<EntityId>,
}

impl PlayerView {
    fn new(player: u8) -> Self {
        Self {
            player,
            ..Default::default()
        }
    }

    fn reveal(&mut self, coord: Coord, tile: Tile) {
        self.tiles.entry(coord).or_insert(tile);
    }
}

/// Compute the views of every player in the world.
pub fn compute_all_views(world: &World, config: &VisionConfig) -> BTreeMap<u8, PlayerView> {
    world
        .players()
        .map(|p| (p.index, compute_view(world, p.index, config)))
        .collect()
}

/// Compute what one player sees.
pub fn compute_view(world: &World, player: u8, config: &VisionConfig) -> PlayerView {
    let mut view = PlayerView::new(player);
    let Some(owner) = world.player(player) else {
        return view;
    };

    for entity in owner.entities.iter().filter_map(|id| world.entity(*id)) {
        reveal_from(world, entity, config, &mut view);
    }

    for coord in view.tiles.keys() {
        for other in world.entities_at(*coord) {
            if other.owner != Some(player) {
                view.foreign.insert(other.id);
            }
        }
    }

    view
}

fn reveal_from(world: &World, entity: &Entity, config: &VisionConfig, view: &mut PlayerView) {
    let size = world.size();
    let origin = entity.pos;
    view.reveal(origin, world.tile(origin));

    let radius = config.max_radius();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx == 0 && dy == 0 {
                continue;
            }
            if !config.is_candidate(dx, dy, entity.facing) {
                continue;
            }
            let target = origin.offset(dx, dy);
            if line_of_sight(world, origin, target) {
                let cell = size.wrap_coord(target);
                view.reveal(cell, world.tile(cell));
            }
        }
    }
}

// =============================================================================
// LINE OF SIGHT
// =============================================================================

/// Line of sight between two (unwrapped) cells.
///
/// Tries the direct line, then the same line shifted by one cell in x and
/// by one cell in y. Visible if any of the three is clear.
pub fn line_of_sight(world: &World, from: Coord, to: Coord) -> bool {
    line_clear(world, from, to)
        || line_clear(world, from.offset(1, 0), to.offset(1, 0))
        || line_clear(world, from.offset(0, 1), to.offset(0, 1))
}

/// Whether every cell strictly between the endpoints is transparent.
fn line_clear(world: &World, from: Coord, to: Coord) -> bool {
    let cells = supercover_line(from, to);
    if cells.len() <= 2 {
        return true;
    }
    cells[1..cells.len() - 1]
        .iter()
        .all(|c| world.tile(*c).is_transparent())
}
