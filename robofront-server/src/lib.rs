//! # Robofront Server
//!
//! Authoritative tick server for Robofront: a length-prefixed binary
//! protocol, a per-connection handshake/lobby/playing state machine, and a
//! fixed-interval simulation with per-player fog of war.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ROBOFRONT SERVER                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                 │
//! │  ├── grid.rs       - Toroidal coordinates, supercover lines   │
//! │  ├── rng.rs        - Deterministic Xorshift128+ PRNG          │
//! │  └── hash.rs       - State hashing and checksums              │
//! │                                                               │
//! │  game/             - Simulation (deterministic)               │
//! │  ├── world.rs      - Tiles, entity arena, players             │
//! │  ├── movement.rs   - Move resolution                          │
//! │  ├── visibility.rs - Fog of war                               │
//! │  ├── tick.rs       - Countdown and tick ordering              │
//! │  ├── scenario.rs   - Map registry and generation              │
//! │  └── persist.rs    - World file                               │
//! │                                                               │
//! │  network/          - Networking (non-deterministic)           │
//! │  ├── framing.rs    - u16 length-prefixed frames               │
//! │  ├── codec.rs      - Big-endian fields and strings            │
//! │  ├── protocol.rs   - Packet types                             │
//! │  ├── session.rs    - Connection state machine                 │
//! │  ├── scheduler.rs  - Tick accumulator                         │
//! │  └── server.rs     - Non-blocking accept/poll loop            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! Inbound bytes → framer → codec → session (validate stage, mutate world
//! or queue a move). Once per interval: movement → visibility → per-player
//! Tick packet → outbox.
//!
//! Everything runs on one thread; no locks anywhere.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use self::core::grid::{Coord, Direction, GridSize};
pub use self::core::rng::DeterministicRng;
pub use game::world::World;
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string a client must send in Hello.
pub const PROTOCOL_VERSION: &str = "robofront/1";
