//! Scenarios
//!
//! The registry of playable maps, world generation, and player spawning.
//! Extra scenarios can be supplied as a JSON list.

use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::grid::{Direction, GridSize};
use crate::core::rng::DeterministicRng;
use crate::game::entity::EntityType;
use crate::game::tile::Tile;
use crate::game::world::{Player, World};

/// A playable map definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name (what ChooseGame refers to).
    pub name: String,
    /// Text shown in the lobby.
    pub description: String,
    /// Grid width in cells.
    pub width: u16,
    /// Grid height in cells.
    pub height: u16,
    /// Chunk edge length in cells.
    pub chunk_size: u8,
    /// Base seed, mixed with the participants' keys.
    pub seed: u64,
    /// Chance per cell of rock (per mille).
    #[serde(default = "default_rock")]
    pub rock_per_mille: u32,
    /// Chance per cell of crystal (per mille).
    #[serde(default = "default_crystal")]
    pub crystal_per_mille: u32,
}

fn default_rock() -> u32 {
    80
}

fn default_crystal() -> u32 {
    40
}

/// Scenario loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// File could not be read.
    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not a valid scenario list.
    #[error("Invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A scenario has unusable dimensions.
    #[error("Scenario '{0}' is invalid: {1}")]
    Invalid(String, &'static str),
}

impl Scenario {
    fn builtin(name: &str, description: &str, side: u16, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            width: side,
            height: side,
            chunk_size: 8,
            seed,
            rock_per_mille: default_rock(),
            crystal_per_mille: default_crystal(),
        }
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |why| Err(ScenarioError::Invalid(self.name.clone(), why));
        if self.name.is_empty() || self.name.len() > 255 {
            return invalid("name must be 1-255 bytes");
        }
        if self.chunk_size < 3 {
            return invalid("chunk size must be at least 3");
        }
        if self.width < self.chunk_size as u16 || self.height < self.chunk_size as u16 {
            return invalid("map smaller than one chunk");
        }
        if self.width > i16::MAX as u16 || self.height > i16::MAX as u16 {
            return invalid("map too large");
        }
        if self.rock_per_mille + self.crystal_per_mille > 1000 {
            return invalid("densities exceed 1000 per mille");
        }
        Ok(())
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Ordered set of known scenarios.
#[derive(Clone, Debug)]
pub struct ScenarioRegistry {
    scenarios: Vec<Scenario>,
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ScenarioRegistry {
    /// Registry with the built-in scenarios.
    pub fn builtin() -> Self {
        Self {
            scenarios: vec![
                Scenario::builtin("duel", "Two bases, tight quarters.", 32, 0x6475_656c),
                Scenario::builtin("skirmish", "Room for a handful of factories.", 48, 0x736b_6972),
                Scenario::builtin("frontier", "Wide open crystal fields.", 64, 0x6672_6f6e),
            ],
        }
    }

    /// Parse a JSON list of scenarios.
    pub fn parse_json(json: &str) -> Result<Vec<Scenario>, ScenarioError> {
        let scenarios: Vec<Scenario> = serde_json::from_str(json)?;
        for scenario in &scenarios {
            scenario.validate()?;
        }
        Ok(scenarios)
    }

    /// Load extra scenarios from a JSON file.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ScenarioError> {
        let json = std::fs::read_to_string(path)?;
        let scenarios = Self::parse_json(&json)?;
        let count = scenarios.len();
        for scenario in scenarios {
            self.insert(scenario);
        }
        Ok(count)
    }

    /// Add a scenario, replacing any with the same name.
    pub fn insert(&mut self, scenario: Scenario) {
        debug!("Registered scenario '{}' ({}x{})", scenario.name, scenario.width, scenario.height);
        match self.scenarios.iter_mut().find(|s| s.name == scenario.name) {
            Some(existing) => *existing = scenario,
            None => self.scenarios.push(scenario),
        }
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// All scenarios in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    /// Number of scenarios.
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

// =============================================================================
// GENERATION
// =============================================================================

/// Generate the terrain of a scenario. No players are placed.
pub fn generate_world(scenario: &Scenario, seed: u64) -> World {
    let size = GridSize::new(scenario.width, scenario.height);
    let mut terrain_rng = DeterministicRng::new(seed);
    let mut world = World::new(size, scenario.chunk_size, Tile::Dirt(0), seed ^ 0x5350_4157_4e00);

    let crystal_threshold = scenario.rock_per_mille + scenario.crystal_per_mille;
    let tiles = (0..size.cell_count())
        .map(|_| {
            let roll = terrain_rng.next_int(1000);
            if roll < scenario.rock_per_mille {
                Tile::Rock
            } else if roll < crystal_threshold {
                Tile::Crystal(0)
            } else {
                Tile::Dirt(0)
            }
        })
        .collect();
    world.replace_tiles(tiles);
    world
}

/// Give a player a base chunk and its starting entities.
///
/// Returns `false` when no free chunk remains.
pub fn spawn_player(world: &mut World, index: u8, key: [u8; 16], name: &str) -> bool {
    let Some(chunk) = world.take_free_chunk() else {
        return false;
    };

    let origin = world.chunk_origin(chunk);
    let cs = world.chunk_size() as i32;
    for y in 1..cs - 1 {
        for x in 1..cs - 1 {
            world.set_tile(origin.offset(x, y), Tile::Path);
        }
    }

    world.add_player(Player::new(index, key, name, index, chunk));

    let centre = world.chunk_centre(chunk);
    world.spawn_entity(EntityType::Factory, Some(index), centre, Direction::East);
    world.spawn_entity(EntityType::Heart, Some(index), centre.offset(-1, 0), Direction::East);
    world.spawn_entity(EntityType::Robot, Some(index), centre.offset(1, 0), Direction::East);

    debug!(
        "Spawned player {} at chunk ({}, {}) centre ({}, {})",
        index, chunk.0, chunk.1, centre.x, centre.y
    );
    true
}
