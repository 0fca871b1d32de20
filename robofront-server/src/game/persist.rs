//! World Persistence
//!
//! Binary world file written at shutdown and read at startup.
//!
//! Layout: magic `RBFW`, a big-endian u16 format version, the bincode body
//! ([`WorldRecord`]), then a SHA-256 checksum of everything before it.

use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::info;

use crate::core::grid::GridSize;
use crate::core::hash::hash_bytes;
use crate::core::rng::DeterministicRng;
use crate::game::entity::{Entity, EntityId};
use crate::game::tile::Tile;
use crate::game::world::{ChunkCoord, Player, World};

/// File magic.
pub const WORLD_MAGIC: &[u8; 4] = b"RBFW";

/// Current format version.
pub const WORLD_FORMAT_VERSION: u16 = 1;

const VERSION_LEN: usize = 2;
const CHECKSUM_LEN: usize = 32;

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// File system failure.
    #[error("World file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Not a world file.
    #[error("Not a world file (bad magic)")]
    BadMagic,

    /// Written by an incompatible version.
    #[error("Unsupported world format version {0}")]
    UnsupportedVersion(u16),

    /// Content does not match its checksum.
    #[error("World file checksum mismatch")]
    ChecksumMismatch,

    /// Body could not be (de)serialized.
    #[error("World serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// Body decoded but describes an impossible world.
    #[error("Corrupt world file: {0}")]
    Corrupt(String),
}

/// Everything needed to rebuild a [`World`].
///
/// Derived indexes (position map, per-player entity sets) are not stored;
/// they are rebuilt on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldRecord {
    /// Grid dimensions.
    pub size: GridSize,
    /// Chunk edge length.
    pub chunk_size: u8,
    /// Last completed tick.
    pub tick: i32,
    /// Simulation RNG.
    pub rng: DeterministicRng,
    /// Row-major tiles.
    pub tiles: Vec<Tile>,
    /// Chunks not yet assigned to a player.
    pub free_chunks: Vec<ChunkCoord>,
    /// Players in index order.
    pub players: Vec<Player>,
    /// Entities in id order.
    pub entities: Vec<Entity>,
    /// Next id to hand out.
    pub next_entity_id: EntityId,
}

impl WorldRecord {
    /// Snapshot a world.
    pub fn capture(world: &World) -> Self {
        Self {
            size: world.size(),
            chunk_size: world.chunk_size(),
            tick: world.tick(),
            rng: world.rng().clone(),
            tiles: world.tiles().to_vec(),
            free_chunks: world.free_chunks().to_vec(),
            players: world.players().cloned().collect(),
            entities: world.entities().cloned().collect(),
            next_entity_id: world.next_entity_id(),
        }
    }

    /// Rebuild the world, checking the record is self-consistent.
    pub fn restore(self) -> Result<World, PersistError> {
        let mut world = World::new(self.size, self.chunk_size, Tile::Path, 0);
        if !world.replace_tiles(self.tiles) {
            return Err(PersistError::Corrupt(format!(
                "tile count does not match {}x{}",
                self.size.width, self.size.height
            )));
        }
        world.set_free_chunks(self.free_chunks);
        for player in self.players {
            world.add_player(player);
        }
        for entity in self.entities {
            if world.entity(entity.id).is_some() {
                return Err(PersistError::Corrupt(format!("duplicate entity id {}", entity.id)));
            }
            world.insert_entity(entity);
        }
        world.set_next_entity_id(self.next_entity_id);
        world.set_tick(self.tick);
        world.rng_mut().set_state(self.rng.state());
        Ok(world)
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Serialize a world, checksum included.
pub fn encode_world(world: &World) -> Result<Vec<u8>, PersistError> {
    let body = bincode::serialize(&WorldRecord::capture(world))?;
    let mut bytes = Vec::with_capacity(WORLD_MAGIC.len() + VERSION_LEN + body.len() + CHECKSUM_LEN);
    bytes.extend_from_slice(WORLD_MAGIC);
    bytes.extend_from_slice(&WORLD_FORMAT_VERSION.to_be_bytes());
    bytes.extend_from_slice(&body);
    let checksum = hash_bytes(&bytes);
    bytes.extend_from_slice(&checksum);
    Ok(bytes)
}

/// Parse a world file produced by [`encode_world`].
pub fn decode_world(bytes: &[u8]) -> Result<World, PersistError> {
    if bytes.len() < WORLD_MAGIC.len() || &bytes[..WORLD_MAGIC.len()] != WORLD_MAGIC {
        return Err(PersistError::BadMagic);
    }
    let header = WORLD_MAGIC.len() + VERSION_LEN;
    if bytes.len() < header + CHECKSUM_LEN {
        return Err(PersistError::Corrupt(format!("file is only {} bytes", bytes.len())));
    }
    let (signed, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if hash_bytes(signed)[..] != checksum[..] {
        return Err(PersistError::ChecksumMismatch);
    }

    let version = u16::from_be_bytes([signed[4], signed[5]]);
    if version != WORLD_FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }

    let record: WorldRecord = bincode::deserialize(&signed[header..])?;
    record.restore()
}

// =============================================================================
// FILES
// =============================================================================

/// Write a world file atomically (temp file, then rename).
pub fn save_world(world: &World, path: &Path) -> Result<(), PersistError> {
    let bytes = encode_world(world)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    info!("Saved world ({} bytes, tick {}) to {}", bytes.len(), world.tick(), path.display());
    Ok(())
}

/// Read a world file. `Ok(None)` when the file does not exist.
pub fn load_world(path: &Path) -> Result<Option<World>, PersistError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let world = decode_world(&bytes)?;
    info!(
        "Loaded world from {} (tick {}, {} entities)",
        path.display(),
        world.tick(),
        world.entity_count()
    );
    Ok(Some(world))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::scenario::{generate_world, spawn_player, ScenarioRegistry};

    fn sample_world() -> World {
        let scenario = ScenarioRegistry::builtin().get("duel").unwrap().clone();
        let mut world = generate_world(&scenario, 77);
        spawn_player(&mut world, 0, [1; 16], "alice");
        spawn_player(&mut world, 1, [2; 16], "bob");
        world.set_tick(42);
        let robot = *world.player(1).unwrap().entities.iter().last().unwrap();
        world.entity_mut(robot).unwrap().resources = 4;
        world
    }

    #[test]
    fn test_world_survives_save_and_load() {
        let world = sample_world();
        let restored = decode_world(&encode_world(&world).unwrap()).unwrap();

        assert_eq!(restored.compute_hash(), world.compute_hash());
        assert_eq!(restored.tick(), 42);
        assert_eq!(restored.player(1).unwrap().name, "bob");
        assert_eq!(restored.player(0).unwrap().entities, world.player(0).unwrap().entities);
        assert_eq!(restored.next_entity_id(), world.next_entity_id());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = encode_world(&sample_world()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(decode_world(&bytes), Err(PersistError::ChecksumMismatch)));
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(decode_world(b"NOPE...."), Err(PersistError::BadMagic)));
        assert!(matches!(decode_world(b""), Err(PersistError::BadMagic)));
    }

    #[test]
    fn test_truncated_file() {
        let bytes = encode_world(&sample_world()).unwrap();
        assert!(decode_world(&bytes[..20]).is_err());
        assert!(matches!(decode_world(b"RBFW\0\x01"), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn test_header_and_body_layout() {
        let world = sample_world();
        let bytes = encode_world(&world).unwrap();
        assert_eq!(&bytes[..4], WORLD_MAGIC);
        assert_eq!(&bytes[4..6], &WORLD_FORMAT_VERSION.to_be_bytes());

        let body = &bytes[6..bytes.len() - CHECKSUM_LEN];
        let record: WorldRecord = bincode::deserialize(body).unwrap();
        assert_eq!(record, WorldRecord::capture(&world));
        assert_eq!(record.entities.len(), world.entity_count());
        assert_eq!(record.rng.state(), world.rng().state());
    }

    #[test]
    fn test_future_version_rejected() {
        let world = sample_world();
        let mut bytes = Vec::from(&WORLD_MAGIC[..]);
        bytes.extend_from_slice(&(WORLD_FORMAT_VERSION + 1).to_be_bytes());
        bytes.extend_from_slice(&bincode::serialize(&WorldRecord::capture(&world)).unwrap());
        let checksum = hash_bytes(&bytes);
        bytes.extend_from_slice(&checksum);
        assert!(matches!(decode_world(&bytes), Err(PersistError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_inconsistent_record_rejected() {
        let mut record = WorldRecord::capture(&sample_world());
        record.tiles.pop();
        assert!(matches!(record.restore(), Err(PersistError::Corrupt(_))));

        let mut record = WorldRecord::capture(&sample_world());
        let dup = record.entities[0].clone();
        record.entities.push(dup);
        assert!(matches!(record.restore(), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn test_missing_file_is_none() {
        let path = std::env::temp_dir().join("robofront-missing-world-file.bin");
        let _ = std::fs::remove_file(&path);
        assert!(load_world(&path).unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_file() {
        let path = std::env::temp_dir()
            .join(format!("robofront-world-{}.bin", uuid::Uuid::new_v4()));
        let world = sample_world();
        save_world(&world, &path).unwrap();
        let loaded = load_world(&path).unwrap().unwrap();
        assert_eq!(loaded.compute_hash(), world.compute_hash());
        let _ = std::fs::remove_file(&path);
    }
}
