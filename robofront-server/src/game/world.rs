//! World Model
//!
//! The toroidal tile grid, the id-indexed entity table and the player table.
//! Uses BTreeMap everywhere for deterministic iteration order.
//!
//! Entities created mid-tick go to a pending list and only enter the table
//! at [`World::commit_spawns`], so a resolution pass never sees its own spawns.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};

use crate::core::grid::{Coord, Direction, GridSize};
use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::game::entity::{Entity, EntityId, EntityType};
use crate::game::tile::Tile;

/// Chunk coordinates (in chunks, not cells).
pub type ChunkCoord = (u16, u16);

// =============================================================================
// PLAYER
// =============================================================================

/// World-side record of a participating player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable slot, shared with the identity.
    pub index: u8,
    /// Identity key the player belongs to.
    pub key: [u8; 16],
    /// Display name at the time the player was created.
    pub name: String,
    /// Team. Entities of the same team cooperate.
    pub team: u8,
    /// Base chunk the player spawned in.
    pub base_chunk: ChunkCoord,
    /// Ids of owned entities.
    pub entities: BTreeSet<EntityId>,
}

impl Player {
    /// Create a player with no entities.
    pub fn new(
        index: u8,
        key: [u8; 16],
        name: impl Into<String>,
        team: u8,
        base_chunk: ChunkCoord,
    ) -> Self {
        Self {
            index,
            key,
            name: name.into(),
            team,
            base_chunk,
            entities: BTreeSet::new(),
        }
    }
}

// =============================================================================
// WORLD
// =============================================================================

/// Complete simulation state.
#[derive(Clone, Debug)]
pub struct World {
    size: GridSize,
    chunk_size: u8,
    tiles: Vec<Tile>,
    free_chunks: Vec<ChunkCoord>,
    entities: BTreeMap<EntityId, Entity>,
    by_position: BTreeMap<Coord, BTreeSet<EntityId>>,
    players: BTreeMap<u8, Player>,
    pending: Vec<Entity>,
    next_entity_id: EntityId,
    tick: i32,
    rng: DeterministicRng,
}

impl World {
    /// Create a world filled with `fill`, every chunk free.
    pub fn new(size: GridSize, chunk_size: u8, fill: Tile, seed: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks_x = (size.width / chunk_size as u16).max(1);
        let chunks_y = (size.height / chunk_size as u16).max(1);
        let mut free_chunks = Vec::with_capacity(chunks_x as usize * chunks_y as usize);
        for cy in 0..chunks_y {
            for cx in 0..chunks_x {
                free_chunks.push((cx, cy));
            }
        }

        Self {
            size,
            chunk_size,
            tiles: vec![fill; size.cell_count()],
            free_chunks,
            entities: BTreeMap::new(),
            by_position: BTreeMap::new(),
            players: BTreeMap::new(),
            pending: Vec::new(),
            next_entity_id: 1,
            tick: 0,
            rng: DeterministicRng::new(seed),
        }
    }

    // -------------------------------------------------------------------------
    // Grid
    // -------------------------------------------------------------------------

    /// Grid dimensions.
    #[inline]
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Chunk edge length in cells.
    #[inline]
    pub fn chunk_size(&self) -> u8 {
        self.chunk_size
    }

    /// Tile at a (possibly unwrapped) coordinate.
    #[inline]
    pub fn tile(&self, c: Coord) -> Tile {
        self.tiles[self.size.index(c)]
    }

    /// Replace the tile at a (possibly unwrapped) coordinate.
    #[inline]
    pub fn set_tile(&mut self, c: Coord, tile: Tile) {
        let index = self.size.index(c);
        self.tiles[index] = tile;
    }

    /// All tiles, row-major.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Replace the whole tile grid. Returns `false` if the length is wrong.
    pub fn replace_tiles(&mut self, tiles: Vec<Tile>) -> bool {
        if tiles.len() != self.size.cell_count() {
            return false;
        }
        self.tiles = tiles;
        true
    }

    // -------------------------------------------------------------------------
    // Chunks
    // -------------------------------------------------------------------------

    /// Chunks not yet assigned to a player.
    pub fn free_chunks(&self) -> &[ChunkCoord] {
        &self.free_chunks
    }

    /// Overwrite the free-chunk pool.
    pub fn set_free_chunks(&mut self, chunks: Vec<ChunkCoord>) {
        self.free_chunks = chunks;
    }

    /// Draw a random free chunk, removing it from the pool.
    pub fn take_free_chunk(&mut self) -> Option<ChunkCoord> {
        self.rng.take_random(&mut self.free_chunks)
    }

    /// Top-left cell of a chunk.
    pub fn chunk_origin(&self, chunk: ChunkCoord) -> Coord {
        let cs = self.chunk_size as i32;
        self.size.wrap(chunk.0 as i32 * cs, chunk.1 as i32 * cs)
    }

    /// Centre cell of a chunk.
    pub fn chunk_centre(&self, chunk: ChunkCoord) -> Coord {
        let half = self.chunk_size as i32 / 2;
        let origin = self.chunk_origin(chunk);
        self.size.wrap(origin.x + half, origin.y + half)
    }

    // -------------------------------------------------------------------------
    // Entities
    // -------------------------------------------------------------------------

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access to an entity.
    ///
    /// Position must be changed through [`World::move_entity`] so the
    /// position index stays in sync.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// All committed entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Ids of all committed entities in id order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Number of committed entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Committed entities occupying a cell.
    pub fn entities_at(&self, c: Coord) -> impl Iterator<Item = &Entity> + '_ {
        let c = self.size.wrap_coord(c);
        self.by_position
            .get(&c)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(move |id| self.entities.get(id))
    }

    /// Next id that will be handed out.
    pub fn next_entity_id(&self) -> EntityId {
        self.next_entity_id
    }

    /// Restore the id high-water mark (never moves backwards).
    pub fn set_next_entity_id(&mut self, next: EntityId) {
        self.next_entity_id = self.next_entity_id.max(next);
    }

    fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Create an entity immediately. Used for spawns outside a tick.
    pub fn spawn_entity(
        &mut self,
        kind: EntityType,
        owner: Option<u8>,
        pos: Coord,
        facing: Direction,
    ) -> EntityId {
        let id = self.allocate_entity_id();
        let entity = Entity::new(id, kind, owner, self.size.wrap_coord(pos), facing);
        self.insert_entity(entity);
        id
    }

    /// Queue an entity for creation at the next [`World::commit_spawns`].
    pub fn queue_spawn(
        &mut self,
        kind: EntityType,
        owner: Option<u8>,
        pos: Coord,
        facing: Direction,
    ) -> EntityId {
        let id = self.allocate_entity_id();
        let entity = Entity::new(id, kind, owner, self.size.wrap_coord(pos), facing);
        self.pending.push(entity);
        id
    }

    /// Move every queued spawn into the entity table.
    pub fn commit_spawns(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for entity in pending {
            self.insert_entity(entity);
        }
        count
    }

    /// Insert a fully-formed entity (id already assigned), linking it to its owner.
    pub fn insert_entity(&mut self, mut entity: Entity) {
        entity.pos = self.size.wrap_coord(entity.pos);
        self.next_entity_id = self.next_entity_id.max(entity.id + 1);
        if let Some(owner) = entity.owner {
            if let Some(player) = self.players.get_mut(&owner) {
                player.entities.insert(entity.id);
            }
        }
        self.by_position.entry(entity.pos).or_default().insert(entity.id);
        self.entities.insert(entity.id, entity);
    }

    /// Relocate an entity, keeping the position index in sync.
    pub fn move_entity(&mut self, id: EntityId, to: Coord) -> bool {
        let to = self.size.wrap_coord(to);
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        let from = entity.pos;
        entity.pos = to;
        self.unindex(from, id);
        self.by_position.entry(to).or_default().insert(id);
        true
    }

    /// Remove an entity from the world and its owner.
    ///
    /// Nothing in the simulation destroys entities yet; this is the hook
    /// for reaping them.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.unindex(entity.pos, id);
        if let Some(owner) = entity.owner {
            if let Some(player) = self.players.get_mut(&owner) {
                player.entities.remove(&id);
            }
        }
        Some(entity)
    }

    fn unindex(&mut self, pos: Coord, id: EntityId) {
        if let Some(ids) = self.by_position.get_mut(&pos) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_position.remove(&pos);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Players
    // -------------------------------------------------------------------------

    /// Add a player. Entities already owned by its index are linked.
    pub fn add_player(&mut self, mut player: Player) {
        player.entities = self
            .entities
            .values()
            .filter(|e| e.owner == Some(player.index))
            .map(|e| e.id)
            .collect();
        self.players.insert(player.index, player);
    }

    /// Look up a player by index.
    pub fn player(&self, index: u8) -> Option<&Player> {
        self.players.get(&index)
    }

    /// All players in index order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Team of a player index, if that player exists.
    pub fn team_of(&self, index: u8) -> Option<u8> {
        self.players.get(&index).map(|p| p.team)
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Current tick index.
    #[inline]
    pub fn tick(&self) -> i32 {
        self.tick
    }

    /// Set the tick index (used when loading).
    pub fn set_tick(&mut self, tick: i32) {
        self.tick = tick;
    }

    /// Advance the tick index by one.
    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// World RNG.
    pub fn rng_mut(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// World RNG (read only).
    pub fn rng(&self) -> &DeterministicRng {
        &self.rng
    }

    // -------------------------------------------------------------------------
    // Hashing
    // -------------------------------------------------------------------------

    /// Hash of the full simulation state.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_world_state();

        hasher.update_u16(self.size.width);
        hasher.update_u16(self.size.height);
        hasher.update_u8(self.chunk_size);
        hasher.update_i32(self.tick);
        hasher.update_i32(self.next_entity_id);

        for tile in &self.tiles {
            hasher.update_u8(tile.to_byte());
        }

        for &(cx, cy) in &self.free_chunks {
            hasher.update_u16(cx);
            hasher.update_u16(cy);
        }

        for player in self.players.values() {
            hasher.update_u8(player.index);
            hasher.update_key(&player.key);
            hasher.update_u8(player.team);
            hasher.update_u16(player.base_chunk.0);
            hasher.update_u16(player.base_chunk.1);
        }

        for entity in self.entities.values() {
            hasher.update_i32(entity.id);
            hasher.update_u8(entity.kind as u8);
            hasher.update_u8(entity.owner_byte() as u8);
            hasher.update_i32(entity.pos.x);
            hasher.update_i32(entity.pos.y);
            hasher.update_u8(entity.facing as u8);
            hasher.update_u16(entity.health as u16);
            hasher.update_u16(entity.resources as u16);
            hasher.update_u8(entity.upcoming_move as u8);
        }

        let [a, b] = self.rng.state();
        hasher.update_bytes(&a.to_be_bytes());
        hasher.update_bytes(&b.to_be_bytes());

        hasher.finalize()
    }
}
