//! Game Logic
//!
//! World model and deterministic simulation. Nothing here touches sockets
//! or wall-clock time.
//!
//! ## Module Structure
//!
//! - `tile`: Terrain and erosion stages
//! - `entity`: Factories, hearts, robots and planned moves
//! - `world`: Grid, entity arena, player table
//! - `movement`: Per-tick move resolution
//! - `visibility`: Fog of war
//! - `tick`: Countdown and tick ordering
//! - `scenario`: Map registry, generation, spawning
//! - `persist`: World file format

pub mod entity;
pub mod movement;
pub mod persist;
pub mod scenario;
pub mod tick;
pub mod tile;
pub mod visibility;
pub mod world;

pub use entity::{Entity, EntityId, EntityType, Move, BUILD_PRICE};
pub use tick::{tick, MatchPhase, PlayerSnapshot, TickConfig, TickResult};
pub use tile::Tile;
pub use visibility::{PlayerView, VisionConfig};
pub use world::{Player, World};
