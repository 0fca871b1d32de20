//! Entity Definitions
//!
//! Factories, hearts and robots. Entities live in the world's id-indexed
//! table; players refer to them only by id.

use serde::{Serialize, Deserialize};

use crate::core::grid::{Coord, Direction};

/// Entity identifier. Monotonic, never reused.
pub type EntityId = i32;

/// Resources a Factory spends to build a robot.
pub const BUILD_PRICE: i16 = 5;

// =============================================================================
// ENTITY TYPE
// =============================================================================

/// Kind of entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityType {
    /// Builds robots, receives resources.
    Factory = 0,
    /// A player's core.
    Heart = 1,
    /// Mobile unit.
    Robot = 2,
}

impl EntityType {
    /// Decode the wire value.
    pub fn from_u8(value: u8) -> Option<EntityType> {
        match value {
            0 => Some(EntityType::Factory),
            1 => Some(EntityType::Heart),
            2 => Some(EntityType::Robot),
            _ => None,
        }
    }

    /// Health a freshly created entity of this type starts with.
    pub fn initial_health(self) -> i16 {
        match self {
            EntityType::Factory => 100,
            EntityType::Heart => 50,
            EntityType::Robot => 10,
        }
    }
}

// =============================================================================
// MOVE
// =============================================================================

/// A planned move, resolved once per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Move {
    /// Do nothing.
    #[default]
    Idle = 0,
    /// Step (or dig) one cell along the facing direction.
    Forward = 1,
    /// Turn 90 degrees clockwise.
    RotateCW = 2,
    /// Turn 90 degrees counter-clockwise.
    RotateCCW = 3,
    /// Factory only: spend resources on a new robot.
    Build = 4,
}

impl Move {
    /// Decode the wire value.
    pub fn from_u8(value: u8) -> Option<Move> {
        match value {
            0 => Some(Move::Idle),
            1 => Some(Move::Forward),
            2 => Some(Move::RotateCW),
            3 => Some(Move::RotateCCW),
            4 => Some(Move::Build),
            _ => None,
        }
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// A single entity on the grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id.
    pub id: EntityId,
    /// Kind.
    pub kind: EntityType,
    /// Owning player index, `None` if unowned.
    pub owner: Option<u8>,
    /// Cell (always wrapped).
    pub pos: Coord,
    /// Facing.
    pub facing: Direction,
    /// Health points.
    pub health: i16,
    /// Carried resources.
    pub resources: i16,
    /// Move to apply on the next tick.
    pub upcoming_move: Move,
}

impl Entity {
    /// Create an entity with default health and no resources.
    pub fn new(
        id: EntityId,
        kind: EntityType,
        owner: Option<u8>,
        pos: Coord,
        facing: Direction,
    ) -> Self {
        Self {
            id,
            kind,
            owner,
            pos,
            facing,
            health: kind.initial_health(),
            resources: 0,
            upcoming_move: Move::Idle,
        }
    }

    /// Owner as the wire's signed byte (-1 = unowned).
    pub fn owner_byte(&self) -> i8 {
        match self.owner {
            Some(index) => index as i8,
            None => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_tags() {
        for tag in 0..=4u8 {
            assert_eq!(Move::from_u8(tag).unwrap() as u8, tag);
        }
        assert_eq!(Move::from_u8(5), None);
    }

    #[test]
    fn test_new_entity_is_idle() {
        let e = Entity::new(7, EntityType::Robot, Some(2), Coord::new(1, 1), Direction::North);
        assert_eq!(e.upcoming_move, Move::Idle);
        assert_eq!(e.resources, 0);
        assert_eq!(e.health, EntityType::Robot.initial_health());
        assert_eq!(e.owner_byte(), 2);
    }

    #[test]
    fn test_unowned_owner_byte() {
        let e = Entity::new(1, EntityType::Heart, None, Coord::default(), Direction::East);
        assert_eq!(e.owner_byte(), -1);
    }
}
