//! Protocol Messages
//!
//! Binary wire format for client-server communication. Every payload starts
//! with a one-byte tag; client and server tags are separate enumerations.
//! All integers are big-endian.

use bytes::Bytes;

use crate::core::grid::{Coord, Direction};
use crate::game::entity::{Entity, EntityId, EntityType, Move};
use crate::game::tile::Tile;
use crate::network::codec::{truncate_to, DecodeError, Decoder, Encoder};
use crate::network::framing::{FrameError, FrameWriter, MAX_PAYLOAD};

/// Most records a Tick list can carry.
pub const MAX_TICK_RECORDS: usize = i16::MAX as usize;

/// Most entries a u8-counted list can carry.
pub const MAX_SMALL_LIST: usize = u8::MAX as usize;

/// Encoded size of one entity record.
pub const ENTITY_RECORD_LEN: usize = 15;

/// Encoded size of one tile record.
pub const TILE_RECORD_LEN: usize = 5;

/// Tick payload bytes before any record: tag, tick, three list counts.
pub const TICK_HEADER_LEN: usize = 1 + 4 + 3 * 2;

/// Chat payload bytes besides the strings: tag and two length prefixes.
const CHAT_HEADER_LEN: usize = 1 + 1 + 2;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Client packet tags.
pub mod client_tag {
    /// Hello
    pub const HELLO: u8 = 0;
    /// Chat
    pub const CHAT: u8 = 1;
    /// ChooseGame
    pub const CHOOSE_GAME: u8 = 2;
    /// SetReady
    pub const SET_READY: u8 = 3;
    /// StartGame
    pub const START_GAME: u8 = 4;
    /// PlanMoves
    pub const PLAN_MOVES: u8 = 5;
}

/// One entry of a PlanMoves packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedMove {
    /// Entity to move.
    pub entity: EntityId,
    /// Move to queue.
    pub mv: Move,
}

/// Packets sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    /// Handshake.
    Hello {
        /// Protocol version string.
        version: String,
        /// Identity key.
        key: [u8; 16],
        /// Display name.
        name: String,
    },
    /// Chat line.
    Chat {
        /// Text.
        text: String,
    },
    /// Host picks a scenario.
    ChooseGame {
        /// Scenario name.
        scenario: String,
    },
    /// Toggle readiness.
    SetReady {
        /// Ready flag.
        ready: bool,
    },
    /// Host starts the game.
    StartGame,
    /// Queue moves for the given tick.
    PlanMoves {
        /// Tick the client believes is current.
        tick: i32,
        /// Moves.
        moves: Vec<PlannedMove>,
    },
}

impl ClientPacket {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientPacket::Hello { .. } => "Hello",
            ClientPacket::Chat { .. } => "Chat",
            ClientPacket::ChooseGame { .. } => "ChooseGame",
            ClientPacket::SetReady { .. } => "SetReady",
            ClientPacket::StartGame => "StartGame",
            ClientPacket::PlanMoves { .. } => "PlanMoves",
        }
    }

    /// Append tag and fields.
    pub fn encode(&self, enc: &mut Encoder) {
        match self {
            ClientPacket::Hello { version, key, name } => {
                enc.put_u8(client_tag::HELLO);
                enc.put_str8(version);
                enc.put_bytes(key);
                enc.put_str8(name);
            }
            ClientPacket::Chat { text } => {
                enc.put_u8(client_tag::CHAT);
                enc.put_str16(text);
            }
            ClientPacket::ChooseGame { scenario } => {
                enc.put_u8(client_tag::CHOOSE_GAME);
                enc.put_str8(scenario);
            }
            ClientPacket::SetReady { ready } => {
                enc.put_u8(client_tag::SET_READY);
                enc.put_u8(u8::from(*ready));
            }
            ClientPacket::StartGame => {
                enc.put_u8(client_tag::START_GAME);
            }
            ClientPacket::PlanMoves { tick, moves } => {
                enc.put_u8(client_tag::PLAN_MOVES);
                enc.put_i32(*tick);
                let moves = &moves[..moves.len().min(MAX_TICK_RECORDS)];
                enc.put_i16(moves.len() as i16);
                for m in moves {
                    enc.put_i32(m.entity);
                    enc.put_u8(m.mv as u8);
                }
            }
        }
    }

    /// Decode a full payload (tag included). Trailing bytes are an error.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(payload);
        let packet = match dec.u8()? {
            client_tag::HELLO => ClientPacket::Hello {
                version: dec.str8()?,
                key: dec.key()?,
                name: dec.str8()?,
            },
            client_tag::CHAT => ClientPacket::Chat { text: dec.str16()? },
            client_tag::CHOOSE_GAME => ClientPacket::ChooseGame { scenario: dec.str8()? },
            client_tag::SET_READY => ClientPacket::SetReady { ready: dec.u8()? != 0 },
            client_tag::START_GAME => ClientPacket::StartGame,
            client_tag::PLAN_MOVES => {
                let tick = dec.i32()?;
                let count = dec.count_i16("move count")?;
                let mut moves = Vec::with_capacity(count.min(dec.remaining() / 5));
                for _ in 0..count {
                    let entity = dec.i32()?;
                    let tag = dec.u8()?;
                    let mv = Move::from_u8(tag).ok_or(DecodeError::InvalidValue {
                        field: "move",
                        value: tag as i64,
                    })?;
                    moves.push(PlannedMove { entity, mv });
                }
                ClientPacket::PlanMoves { tick, moves }
            }
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        dec.finish()?;
        Ok(packet)
    }

    /// Encode as a length-prefixed frame.
    pub fn to_frame(&self) -> Result<Bytes, FrameError> {
        let mut writer = FrameWriter::new();
        self.encode(writer.encoder());
        writer.finish()
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Server packet tags.
pub mod server_tag {
    /// Welcome
    pub const WELCOME: u8 = 0;
    /// Kick
    pub const KICK: u8 = 1;
    /// Chat
    pub const CHAT: u8 = 2;
    /// PeerList
    pub const PEER_LIST: u8 = 3;
    /// SetScenario
    pub const SET_SCENARIO: u8 = 4;
    /// SetupCountdown
    pub const SETUP_COUNTDOWN: u8 = 5;
    /// Tick
    pub const TICK: u8 = 6;
}

/// PeerList flag bits.
pub mod peer_flags {
    /// Identity is the host.
    pub const HOST: u8 = 0x01;
    /// Identity has a live connection.
    pub const ONLINE: u8 = 0x02;
    /// Identity is ready.
    pub const READY: u8 = 0x04;
}

/// A scenario as listed in the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioInfo {
    /// Name.
    pub name: String,
    /// Description.
    pub description: String,
}

/// One player's placement in a game setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPlayer {
    /// Player index.
    pub index: u8,
    /// Team.
    pub team: u8,
    /// Base chunk column.
    pub chunk_x: u16,
    /// Base chunk row.
    pub chunk_y: u16,
}

/// Static description of a running game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSetup {
    /// Map width.
    pub width: u16,
    /// Map height.
    pub height: u16,
    /// Chunk size.
    pub chunk_size: u8,
    /// Current tick.
    pub tick: i32,
    /// Participating players.
    pub players: Vec<SetupPlayer>,
}

/// Stage-specific part of a Welcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WelcomeStage {
    /// Stage 0: scenario list.
    Lobby {
        /// Available scenarios.
        scenarios: Vec<ScenarioInfo>,
    },
    /// Stage 1: game in progress.
    Playing {
        /// Setup.
        setup: GameSetup,
    },
}

/// One PeerList entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    /// Display name.
    pub name: String,
    /// Bit flags, see [`peer_flags`].
    pub flags: u8,
    /// Player index.
    pub index: u8,
}

impl PeerEntry {
    /// Host flag set.
    pub fn is_host(&self) -> bool {
        self.flags & peer_flags::HOST != 0
    }

    /// Online flag set.
    pub fn is_online(&self) -> bool {
        self.flags & peer_flags::ONLINE != 0
    }

    /// Ready flag set.
    pub fn is_ready(&self) -> bool {
        self.flags & peer_flags::READY != 0
    }
}

/// Fixed-size entity record in a Tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRecord {
    /// Entity id.
    pub id: EntityId,
    /// Column.
    pub x: i16,
    /// Row.
    pub y: i16,
    /// Owner index, -1 if unowned.
    pub owner: i8,
    /// Type.
    pub kind: EntityType,
    /// Facing.
    pub facing: Direction,
    /// Health.
    pub health: i16,
    /// Resources.
    pub resources: i16,
}

impl From<&Entity> for EntityRecord {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id,
            x: e.pos.x as i16,
            y: e.pos.y as i16,
            owner: e.owner_byte(),
            kind: e.kind,
            facing: e.facing,
            health: e.health,
            resources: e.resources,
        }
    }
}

/// One seen tile in a Tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRecord {
    /// Column.
    pub x: i16,
    /// Row.
    pub y: i16,
    /// Tile.
    pub tile: Tile,
}

impl From<(Coord, Tile)> for TileRecord {
    fn from((c, tile): (Coord, Tile)) -> Self {
        Self {
            x: c.x as i16,
            y: c.y as i16,
            tile,
        }
    }
}

/// Full per-player state for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPacket {
    /// Tick index after the resolution.
    pub tick: i32,
    /// Owned entities.
    pub owned: Vec<EntityRecord>,
    /// Visible foreign entities.
    pub foreign: Vec<EntityRecord>,
    /// Visible tiles.
    pub tiles: Vec<TileRecord>,
}

impl TickPacket {
    /// Drop records until the payload fits one frame.
    ///
    /// Owned entities are kept first, then foreign entities, then tiles.
    /// Returns how many records were dropped.
    pub fn fit_to_frame(&mut self) -> usize {
        let before = self.owned.len() + self.foreign.len() + self.tiles.len();
        let mut budget = MAX_PAYLOAD - TICK_HEADER_LEN;

        let owned = self.owned.len().min(budget / ENTITY_RECORD_LEN).min(MAX_TICK_RECORDS);
        self.owned.truncate(owned);
        budget -= owned * ENTITY_RECORD_LEN;

        let foreign = self.foreign.len().min(budget / ENTITY_RECORD_LEN).min(MAX_TICK_RECORDS);
        self.foreign.truncate(foreign);
        budget -= foreign * ENTITY_RECORD_LEN;

        let tiles = self.tiles.len().min(budget / TILE_RECORD_LEN).min(MAX_TICK_RECORDS);
        self.tiles.truncate(tiles);

        before - (self.owned.len() + self.foreign.len() + self.tiles.len())
    }
}

/// Packets sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    /// Handshake accepted.
    Welcome {
        /// Receiver's player index.
        player_index: u8,
        /// Current stage.
        stage: WelcomeStage,
    },
    /// Connection is being closed.
    Kick {
        /// Reason (empty when unknown).
        reason: String,
    },
    /// Chat line.
    Chat {
        /// Sender name.
        sender: String,
        /// Text.
        text: String,
    },
    /// All known identities.
    PeerList {
        /// Entries in index order.
        peers: Vec<PeerEntry>,
    },
    /// Host picked a scenario.
    SetScenario {
        /// Name.
        name: String,
        /// Description.
        description: String,
    },
    /// Game created, countdown running.
    SetupCountdown {
        /// Intervals before the first tick.
        ticks_remaining: u16,
        /// Setup.
        setup: GameSetup,
    },
    /// Per-player tick snapshot.
    Tick(TickPacket),
}

impl ServerPacket {
    /// Chat line with the text cut so the payload fits one frame.
    pub fn chat(sender: &str, text: &str) -> Self {
        let sender = truncate_to(sender, u8::MAX as usize);
        let room = MAX_PAYLOAD - CHAT_HEADER_LEN - sender.len();
        ServerPacket::Chat {
            sender: sender.to_owned(),
            text: truncate_to(text, room).to_owned(),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerPacket::Welcome { .. } => "Welcome",
            ServerPacket::Kick { .. } => "Kick",
            ServerPacket::Chat { .. } => "Chat",
            ServerPacket::PeerList { .. } => "PeerList",
            ServerPacket::SetScenario { .. } => "SetScenario",
            ServerPacket::SetupCountdown { .. } => "SetupCountdown",
            ServerPacket::Tick(_) => "Tick",
        }
    }

    /// Append tag and fields.
    pub fn encode(&self, enc: &mut Encoder) {
        match self {
            ServerPacket::Welcome { player_index, stage } => {
                enc.put_u8(server_tag::WELCOME);
                enc.put_u8(*player_index);
                match stage {
                    WelcomeStage::Lobby { scenarios } => {
                        enc.put_u8(0);
                        let scenarios = &scenarios[..scenarios.len().min(MAX_SMALL_LIST)];
                        enc.put_u8(scenarios.len() as u8);
                        for s in scenarios {
                            enc.put_str8(&s.name);
                            enc.put_str16(&s.description);
                        }
                    }
                    WelcomeStage::Playing { setup } => {
                        enc.put_u8(1);
                        encode_setup(enc, setup);
                    }
                }
            }
            ServerPacket::Kick { reason } => {
                enc.put_u8(server_tag::KICK);
                enc.put_str16(reason);
            }
            ServerPacket::Chat { sender, text } => {
                enc.put_u8(server_tag::CHAT);
                enc.put_str8(sender);
                enc.put_str16(text);
            }
            ServerPacket::PeerList { peers } => {
                enc.put_u8(server_tag::PEER_LIST);
                let peers = &peers[..peers.len().min(MAX_SMALL_LIST)];
                enc.put_u8(peers.len() as u8);
                for p in peers {
                    enc.put_str8(&p.name);
                    enc.put_u8(p.flags);
                    enc.put_u8(p.index);
                }
            }
            ServerPacket::SetScenario { name, description } => {
                enc.put_u8(server_tag::SET_SCENARIO);
                enc.put_str8(name);
                enc.put_str16(description);
            }
            ServerPacket::SetupCountdown { ticks_remaining, setup } => {
                enc.put_u8(server_tag::SETUP_COUNTDOWN);
                enc.put_u16(*ticks_remaining);
                encode_setup(enc, setup);
            }
            ServerPacket::Tick(t) => {
                enc.put_u8(server_tag::TICK);
                enc.put_i32(t.tick);
                encode_entities(enc, &t.owned);
                encode_entities(enc, &t.foreign);
                let tiles = &t.tiles[..t.tiles.len().min(MAX_TICK_RECORDS)];
                enc.put_i16(tiles.len() as i16);
                for tile in tiles {
                    enc.put_i16(tile.x);
                    enc.put_i16(tile.y);
                    enc.put_u8(tile.tile.to_byte());
                }
            }
        }
    }

    /// Decode a full payload (tag included). Trailing bytes are an error.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(payload);
        let packet = match dec.u8()? {
            server_tag::WELCOME => {
                let player_index = dec.u8()?;
                let stage = match dec.u8()? {
                    0 => {
                        let count = dec.u8()?;
                        let mut scenarios = Vec::with_capacity(count as usize);
                        for _ in 0..count {
                            scenarios.push(ScenarioInfo {
                                name: dec.str8()?,
                                description: dec.str16()?,
                            });
                        }
                        WelcomeStage::Lobby { scenarios }
                    }
                    1 => WelcomeStage::Playing { setup: decode_setup(&mut dec)? },
                    other => {
                        return Err(DecodeError::InvalidValue {
                            field: "stage",
                            value: other as i64,
                        });
                    }
                };
                ServerPacket::Welcome { player_index, stage }
            }
            server_tag::KICK => ServerPacket::Kick { reason: dec.str16()? },
            server_tag::CHAT => ServerPacket::Chat {
                sender: dec.str8()?,
                text: dec.str16()?,
            },
            server_tag::PEER_LIST => {
                let count = dec.u8()?;
                let mut peers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    peers.push(PeerEntry {
                        name: dec.str8()?,
                        flags: dec.u8()?,
                        index: dec.u8()?,
                    });
                }
                ServerPacket::PeerList { peers }
            }
            server_tag::SET_SCENARIO => ServerPacket::SetScenario {
                name: dec.str8()?,
                description: dec.str16()?,
            },
            server_tag::SETUP_COUNTDOWN => ServerPacket::SetupCountdown {
                ticks_remaining: dec.u16()?,
                setup: decode_setup(&mut dec)?,
            },
            server_tag::TICK => {
                let tick = dec.i32()?;
                let owned = decode_entities(&mut dec)?;
                let foreign = decode_entities(&mut dec)?;
                let count = dec.count_i16("tile count")?;
                let mut tiles = Vec::with_capacity(count.min(dec.remaining() / TILE_RECORD_LEN));
                for _ in 0..count {
                    let x = dec.i16()?;
                    let y = dec.i16()?;
                    let byte = dec.u8()?;
                    let tile = Tile::from_byte(byte).ok_or(DecodeError::InvalidValue {
                        field: "tile",
                        value: byte as i64,
                    })?;
                    tiles.push(TileRecord { x, y, tile });
                }
                ServerPacket::Tick(TickPacket { tick, owned, foreign, tiles })
            }
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        dec.finish()?;
        Ok(packet)
    }

    /// Encode as a length-prefixed frame.
    pub fn to_frame(&self) -> Result<Bytes, FrameError> {
        let mut writer = FrameWriter::new();
        self.encode(writer.encoder());
        writer.finish()
    }
}

fn encode_setup(enc: &mut Encoder, setup: &GameSetup) {
    enc.put_u16(setup.width);
    enc.put_u16(setup.height);
    enc.put_u8(setup.chunk_size);
    enc.put_i32(setup.tick);
    let players = &setup.players[..setup.players.len().min(MAX_SMALL_LIST)];
    enc.put_u8(players.len() as u8);
    for p in players {
        enc.put_u8(p.index);
        enc.put_u8(p.team);
        enc.put_u16(p.chunk_x);
        enc.put_u16(p.chunk_y);
    }
}

fn decode_setup(dec: &mut Decoder<'_>) -> Result<GameSetup, DecodeError> {
    let width = dec.u16()?;
    let height = dec.u16()?;
    let chunk_size = dec.u8()?;
    let tick = dec.i32()?;
    let count = dec.u8()?;
    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        players.push(SetupPlayer {
            index: dec.u8()?,
            team: dec.u8()?,
            chunk_x: dec.u16()?,
            chunk_y: dec.u16()?,
        });
    }
    Ok(GameSetup { width, height, chunk_size, tick, players })
}

fn encode_entities(enc: &mut Encoder, records: &[EntityRecord]) {
    let records = &records[..records.len().min(MAX_TICK_RECORDS)];
    enc.put_i16(records.len() as i16);
    for r in records {
        enc.put_i32(r.id);
        enc.put_i16(r.x);
        enc.put_i16(r.y);
        enc.put_i8(r.owner);
        enc.put_u8(r.kind as u8);
        enc.put_u8(r.facing as u8);
        enc.put_i16(r.health);
        enc.put_i16(r.resources);
    }
}

fn decode_entities(dec: &mut Decoder<'_>) -> Result<Vec<EntityRecord>, DecodeError> {
    let count = dec.count_i16("entity count")?;
    let mut records = Vec::with_capacity(count.min(dec.remaining() / 15));
    for _ in 0..count {
        let id = dec.i32()?;
        let x = dec.i16()?;
        let y = dec.i16()?;
        let owner = dec.i8()?;
        let kind_byte = dec.u8()?;
        let kind = EntityType::from_u8(kind_byte).ok_or(DecodeError::InvalidValue {
            field: "entity type",
            value: kind_byte as i64,
        })?;
        let dir = dec.u8()?;
        if dir > 3 {
            return Err(DecodeError::InvalidValue { field: "direction", value: dir as i64 });
        }
        records.push(EntityRecord {
            id,
            x,
            y,
            owner,
            kind,
            facing: Direction::from_u8(dir),
            health: dec.i16()?,
            resources: dec.i16()?,
        });
    }
    Ok(records)
}
