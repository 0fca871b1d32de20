//! Tile Types
//!
//! The terrain of a single grid cell and its wire byte.

use serde::{Serialize, Deserialize};

/// Last erosion stage of dirt and crystal.
pub const MAX_EROSION_STAGE: u8 = 2;

/// Terrain of one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tile {
    /// Open ground. The only tile that does not block sight.
    Path,
    /// Impassable.
    Rock,
    /// Erodes to Path.
    Dirt(u8),
    /// Erodes to Path and yields one resource.
    Crystal(u8),
}

impl Default for Tile {
    fn default() -> Self {
        Tile::Dirt(0)
    }
}

impl Tile {
    /// Wire encoding.
    pub fn to_byte(self) -> u8 {
        match self {
            Tile::Path => 0,
            Tile::Rock => 1,
            Tile::Dirt(stage) => 2 + stage.min(MAX_EROSION_STAGE),
            Tile::Crystal(stage) => 5 + stage.min(MAX_EROSION_STAGE),
        }
    }

    /// Decode a wire byte. Returns `None` for values outside 0..=7.
    pub fn from_byte(byte: u8) -> Option<Tile> {
        match byte {
            0 => Some(Tile::Path),
            1 => Some(Tile::Rock),
            2..=4 => Some(Tile::Dirt(byte - 2)),
            5..=7 => Some(Tile::Crystal(byte - 5)),
            _ => None,
        }
    }

    /// Whether sight passes through this tile.
    #[inline]
    pub fn is_transparent(self) -> bool {
        matches!(self, Tile::Path)
    }
}
