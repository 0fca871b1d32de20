//! Core deterministic primitives.
//!
//! Grid math, RNG and hashing. Nothing here knows about players,
//! entities or sockets.

pub mod grid;
pub mod hash;
pub mod rng;

// Re-export core types
pub use grid::{Coord, Direction, GridSize};
pub use hash::{StateHash, StateHasher};
pub use rng::DeterministicRng;
