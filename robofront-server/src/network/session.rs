//! Session State Machine
//!
//! Owns every connection, the identity registry and the running game.
//! Inbound packets go through a single dispatch site that returns
//! `Result<(), ProtocolViolation>`; the decision to kick is made once, at
//! the boundary in [`Session::poll`].

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::rng::derive_world_seed;
use crate::game::persist::{save_world, PersistError};
use crate::game::scenario::{generate_world, spawn_player, ScenarioRegistry};
use crate::game::tick::{plan_move, snapshot, tick, MatchPhase, PlayerSnapshot, TickConfig};
use crate::game::world::World;
use crate::network::codec::DecodeError;
use crate::network::connection::{Connection, ConnectionId, Link, Stage};
use crate::network::framing::ReadStatus;
use crate::network::identity::{key_prefix, IdentityError, IdentityKey, IdentityRegistry};
use crate::network::protocol::{
    ClientPacket, EntityRecord, GameSetup, PlannedMove, ScenarioInfo, ServerPacket, SetupPlayer,
    TickPacket, TileRecord, WelcomeStage,
};
use crate::PROTOCOL_VERSION;

/// Sender name of server-generated chat lines.
pub const SERVER_SENDER: &str = "server";

// =============================================================================
// ERRORS
// =============================================================================

/// Connection-scoped protocol failure. Always ends in a kick.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    /// Truncated or malformed payload.
    #[error("malformed packet: {0}")]
    Malformed(#[from] DecodeError),

    /// Packet not legal in the connection's stage.
    #[error("{packet} is not allowed in stage {stage:?}")]
    UnexpectedPacket {
        /// Packet kind.
        packet: &'static str,
        /// Stage it arrived in.
        stage: Stage,
    },

    /// Hello carried the wrong protocol version.
    #[error("protocol version mismatch: server speaks '{expected}', client sent '{got}'")]
    VersionMismatch {
        /// Server version.
        expected: &'static str,
        /// Client version.
        got: String,
    },

    /// Identity validation failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Host-only command from a non-host.
    #[error("only the host can {0}")]
    NotHost(&'static str),

    /// ChooseGame named a scenario that does not exist.
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),

    /// Inconsistent server-side state while handling a packet.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl ProtocolViolation {
    /// Reason shown to the kicked client, if one should be.
    pub fn reason(&self) -> Option<String> {
        match self {
            ProtocolViolation::Internal(_) => None,
            other => Some(other.to_string()),
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Simulation parameters.
    pub tick: TickConfig,
    /// Intervals burnt between StartGame and the first tick.
    pub countdown_ticks: u16,
    /// Outbox cap per connection; sends beyond it are dropped.
    pub max_outbox_bytes: usize,
    /// Log tick progress every N ticks.
    pub progress_log_every: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig::default(),
            countdown_ticks: 6,
            max_outbox_bytes: 256 * 1024,
            progress_log_every: 20,
        }
    }
}

/// Server-wide stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStage {
    /// No game yet.
    Lobby,
    /// A world exists (countdown or running).
    Playing,
}

/// A running game.
#[derive(Debug)]
struct Game {
    world: World,
    phase: MatchPhase,
}

// =============================================================================
// SESSION
// =============================================================================

/// All connection and game state, threaded through the scheduler.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    scenarios: ScenarioRegistry,
    chosen: Option<String>,
    identities: IdentityRegistry,
    game: Option<Game>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,
    failed_sends: u64,
}

impl Session {
    /// Create a session in the lobby.
    pub fn new(config: SessionConfig, scenarios: ScenarioRegistry) -> Self {
        Self {
            config,
            scenarios,
            chosen: None,
            identities: IdentityRegistry::new(),
            game: None,
            connections: BTreeMap::new(),
            next_connection_id: 1,
            failed_sends: 0,
        }
    }

    /// Resume a saved world: identities come back offline, stage is Playing.
    pub fn restore(&mut self, world: World) {
        for player in world.players() {
            self.identities.restore(player.key, &player.name, player.index);
        }
        info!(
            "Restored game at tick {} with {} players",
            world.tick(),
            self.identities.len()
        );
        self.game = Some(Game {
            world,
            phase: MatchPhase::Playing,
        });
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Server-wide stage.
    pub fn stage(&self) -> ServerStage {
        if self.game.is_some() {
            ServerStage::Playing
        } else {
            ServerStage::Lobby
        }
    }

    /// Current match phase, if a game exists.
    pub fn phase(&self) -> Option<MatchPhase> {
        self.game.as_ref().map(|g| g.phase)
    }

    /// The world, if a game exists.
    pub fn world(&self) -> Option<&World> {
        self.game.as_ref().map(|g| &g.world)
    }

    /// Known identities.
    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Scenario picked by the host.
    pub fn chosen_scenario(&self) -> Option<&str> {
        self.chosen.as_deref()
    }

    /// Look up a connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.values().filter(|c| !c.is_closed()).count()
    }

    /// Sends dropped so far.
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Register an accepted link in WaitingForHandshake.
    pub fn add_connection(&mut self, peer: impl Into<String>, link: Box<dyn Link>) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        let conn = Connection::new(id, peer, link);
        info!("Accepted connection {} from {}", id, conn.peer);
        self.connections.insert(id, conn);
        id
    }

    /// Drain every connection and dispatch its packets.
    pub fn poll(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.poll_connection(id);
        }
    }

    fn poll_connection(&mut self, id: ConnectionId) {
        let mut payloads = Vec::new();
        let status = match self.connections.get_mut(&id) {
            Some(conn) if !conn.is_closed() => conn.receive(&mut payloads),
            _ => return,
        };

        for payload in payloads {
            if let Err(violation) = self.handle_packet(id, &payload) {
                self.kick(id, violation);
                return;
            }
        }

        match status {
            Ok(ReadStatus::Open) => {}
            Ok(ReadStatus::Closed) => {
                info!("Connection {} closed by peer", id);
                self.close(id);
            }
            Err(e) => {
                warn!("Read error on connection {}: {}", id, e);
                self.close(id);
            }
        }
    }

    /// Send a Kick (with reason when known), then close.
    pub fn kick(&mut self, id: ConnectionId, violation: ProtocolViolation) {
        let peer = self.connections.get(&id).map(|c| c.peer.clone()).unwrap_or_default();
        warn!("Kicking connection {} ({}): {}", id, peer, violation);
        let reason = violation.reason().unwrap_or_default();
        self.send(id, &ServerPacket::Kick { reason });
        if let Some(conn) = self.connections.get_mut(&id) {
            if conn.flush().is_err() {
                self.failed_sends += 1;
            }
        }
        self.close(id);
    }

    /// Mark a connection closed; its identity goes offline.
    fn close(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.is_closed() {
            return;
        }
        conn.stage = Stage::Closed;
        conn.discard_outbox();
        if let Some(index) = conn.identity.take() {
            self.identities.set_offline(index);
            if let Some(identity) = self.identities.get(index) {
                info!("Player {} ('{}') went offline", index, identity.name);
            }
            self.broadcast_peer_list();
        }
    }

    /// Flush every outbox and drop closed connections.
    pub fn flush(&mut self) {
        let mut broken = Vec::new();
        for conn in self.connections.values_mut() {
            if conn.is_closed() {
                continue;
            }
            if let Err(e) = conn.flush() {
                let dropped = conn.discard_outbox();
                self.failed_sends += 1;
                debug!("Send to connection {} failed ({}), dropped {} bytes", conn.id, e, dropped);
                broken.push(conn.id);
            }
        }
        for id in broken {
            self.close(id);
        }
        self.connections.retain(|_, c| !c.is_closed());
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Best-effort send: queue one frame, never retried.
    ///
    /// Encoding failures and full outboxes count as failed sends; the next
    /// full snapshot resynchronises the client.
    pub fn send(&mut self, id: ConnectionId, packet: &ServerPacket) {
        let frame = match packet.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.failed_sends += 1;
                debug!("Dropping {} to connection {}: {}", packet.kind(), id, e);
                return;
            }
        };
        self.queue_frame(id, packet.kind(), &frame);
    }

    fn queue_frame(&mut self, id: ConnectionId, kind: &'static str, frame: &[u8]) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.is_closed() {
            return;
        }
        if conn.outbox_len() + frame.len() > self.config.max_outbox_bytes {
            self.failed_sends += 1;
            debug!("Dropping {} to connection {}: outbox full", kind, id);
            return;
        }
        conn.queue_frame(frame);
    }

    /// Send to every identified connection (Lobby or Playing).
    fn broadcast(&mut self, packet: &ServerPacket) {
        let frame = match packet.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.failed_sends += 1;
                debug!("Dropping broadcast {}: {}", packet.kind(), e);
                return;
            }
        };
        let targets: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.identity.is_some() && matches!(c.stage, Stage::Lobby | Stage::Playing))
            .map(|c| c.id)
            .collect();
        for id in targets {
            self.queue_frame(id, packet.kind(), &frame);
        }
    }

    fn broadcast_peer_list(&mut self) {
        let peers = self.identities.peer_entries();
        self.broadcast(&ServerPacket::PeerList { peers });
    }

    fn server_chat(&mut self, id: ConnectionId, text: &str) {
        let packet = ServerPacket::chat(SERVER_SENDER, text);
        self.send(id, &packet);
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Decode and dispatch one payload from a connection.
    pub fn handle_packet(
        &mut self,
        id: ConnectionId,
        payload: &[u8],
    ) -> Result<(), ProtocolViolation> {
        let packet = ClientPacket::decode(payload)?;
        let stage = self
            .connections
            .get(&id)
            .map(|c| c.stage)
            .ok_or(ProtocolViolation::Internal("unknown connection"))?;

        match (stage, packet) {
            (Stage::WaitingForHandshake, ClientPacket::Hello { version, key, name }) => {
                self.handle_hello(id, &version, key, &name)
            }
            (Stage::Lobby | Stage::Playing, ClientPacket::Chat { text }) => {
                self.handle_chat(id, text)
            }
            (Stage::Lobby, ClientPacket::ChooseGame { scenario }) => {
                self.handle_choose_game(id, scenario)
            }
            (Stage::Lobby, ClientPacket::SetReady { ready }) => self.handle_set_ready(id, ready),
            (Stage::Lobby, ClientPacket::StartGame) => self.handle_start_game(id),
            (Stage::Playing, ClientPacket::PlanMoves { tick, moves }) => {
                self.handle_plan_moves(id, tick, &moves)
            }
            (stage, packet) => Err(ProtocolViolation::UnexpectedPacket {
                packet: packet.kind(),
                stage,
            }),
        }
    }

    fn identity_of(&self, id: ConnectionId) -> Result<u8, ProtocolViolation> {
        self.connections
            .get(&id)
            .and_then(|c| c.identity)
            .ok_or(ProtocolViolation::Internal("connection has no identity"))
    }

    fn require_host(&self, index: u8, action: &'static str) -> Result<(), ProtocolViolation> {
        if self.identities.host() == Some(index) {
            Ok(())
        } else {
            Err(ProtocolViolation::NotHost(action))
        }
    }

    fn handle_hello(
        &mut self,
        id: ConnectionId,
        version: &str,
        key: IdentityKey,
        name: &str,
    ) -> Result<(), ProtocolViolation> {
        if version != PROTOCOL_VERSION {
            return Err(ProtocolViolation::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version.to_string(),
            });
        }

        let admission = self.identities.admit(key, name)?;
        let index = admission.index;
        info!(
            "Handshake: '{}' is player {} (key {}, {})",
            name,
            index,
            key_prefix(&key),
            if admission.is_new { "new" } else { "returning" }
        );

        let (stage, welcome) = match self.game.as_mut() {
            None => (
                Stage::Lobby,
                WelcomeStage::Lobby {
                    scenarios: self.scenario_infos(),
                },
            ),
            Some(game) => {
                if game.world.player(index).is_none() {
                    if spawn_player(&mut game.world, index, key, name) {
                        info!("Player {} joined the running game", index);
                    } else {
                        warn!("No free chunk for player {}; observing only", index);
                    }
                }
                (
                    Stage::Playing,
                    WelcomeStage::Playing {
                        setup: game_setup(&game.world),
                    },
                )
            }
        };

        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(ProtocolViolation::Internal("unknown connection"))?;
        conn.identity = Some(index);
        conn.stage = stage;

        self.send(id, &ServerPacket::Welcome { player_index: index, stage: welcome });
        if stage == Stage::Lobby {
            if let Some(scenario) = self.chosen.as_deref().and_then(|n| self.scenarios.get(n)) {
                let packet = ServerPacket::SetScenario {
                    name: scenario.name.clone(),
                    description: scenario.description.clone(),
                };
                self.send(id, &packet);
            }
        }
        self.broadcast_peer_list();
        Ok(())
    }

    fn handle_chat(&mut self, id: ConnectionId, text: String) -> Result<(), ProtocolViolation> {
        let index = self.identity_of(id)?;
        let sender = self
            .identities
            .get(index)
            .map(|i| i.name.clone())
            .ok_or(ProtocolViolation::Internal("identity missing"))?;
        debug!("Chat from '{}': {} bytes", sender, text.len());
        self.broadcast(&ServerPacket::chat(&sender, &text));
        Ok(())
    }

    fn handle_choose_game(
        &mut self,
        id: ConnectionId,
        name: String,
    ) -> Result<(), ProtocolViolation> {
        let index = self.identity_of(id)?;
        self.require_host(index, "choose the scenario")?;
        let scenario = self
            .scenarios
            .get(&name)
            .ok_or_else(|| ProtocolViolation::UnknownScenario(name.clone()))?;
        let packet = ServerPacket::SetScenario {
            name: scenario.name.clone(),
            description: scenario.description.clone(),
        };
        info!("Host chose scenario '{}'", name);
        self.chosen = Some(name);
        self.broadcast(&packet);
        Ok(())
    }

    fn handle_set_ready(&mut self, id: ConnectionId, ready: bool) -> Result<(), ProtocolViolation> {
        let index = self.identity_of(id)?;
        self.identities.set_ready(index, ready);
        self.broadcast_peer_list();
        Ok(())
    }

    fn handle_start_game(&mut self, id: ConnectionId) -> Result<(), ProtocolViolation> {
        let index = self.identity_of(id)?;
        self.require_host(index, "start the game")?;

        if self.chosen.is_none() {
            self.server_chat(id, "Choose a scenario before starting.");
            return Ok(());
        }
        if !self.identities.all_online_ready() {
            let waiting = self.identities.not_ready().join(", ");
            self.server_chat(id, &format!("Waiting for players to get ready: {}", waiting));
            return Ok(());
        }

        self.start_game()
    }

    fn start_game(&mut self) -> Result<(), ProtocolViolation> {
        let scenario = self
            .chosen
            .as_deref()
            .and_then(|n| self.scenarios.get(n))
            .cloned()
            .ok_or(ProtocolViolation::Internal("chosen scenario vanished"))?;

        let keys: Vec<IdentityKey> = self.identities.iter().map(|i| i.key).collect();
        let seed = derive_world_seed(scenario.seed, &scenario.name, &keys);
        let mut world = generate_world(&scenario, seed);
        for identity in self.identities.iter() {
            if !spawn_player(&mut world, identity.index, identity.key, &identity.name) {
                warn!("No free chunk for player {}; observing only", identity.index);
            }
        }

        let phase = MatchPhase::starting(self.config.countdown_ticks);
        let setup = game_setup(&world);
        info!(
            "Starting '{}' ({}x{}) with {} players, seed {:#018x}",
            scenario.name,
            scenario.width,
            scenario.height,
            setup.players.len(),
            seed
        );
        self.game = Some(Game { world, phase });

        let lobby: Vec<ConnectionId> = self
            .connections
            .values_mut()
            .filter(|c| c.stage == Stage::Lobby)
            .map(|c| {
                c.stage = Stage::Playing;
                c.id
            })
            .collect();
        let packet = ServerPacket::SetupCountdown {
            ticks_remaining: self.config.countdown_ticks,
            setup,
        };
        for id in lobby {
            self.send(id, &packet);
        }
        self.broadcast_peer_list();
        Ok(())
    }

    fn handle_plan_moves(
        &mut self,
        id: ConnectionId,
        tick: i32,
        moves: &[PlannedMove],
    ) -> Result<(), ProtocolViolation> {
        let index = self.identity_of(id)?;
        let game = self
            .game
            .as_mut()
            .ok_or(ProtocolViolation::Internal("no game running"))?;

        let current = game.world.tick();
        if tick != current {
            debug!(
                "Dropping stale PlanMoves from player {} (tick {}, current {})",
                index, tick, current
            );
            return Ok(());
        }

        for m in moves {
            if !plan_move(&mut game.world, index, m.entity, m.mv) {
                warn!("Player {} planned a move for entity {} it does not own", index, m.entity);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Ticking
    // -------------------------------------------------------------------------

    /// Run one scheduler interval: countdown or simulation plus broadcast.
    pub fn on_interval(&mut self) {
        let Some(game) = self.game.as_mut() else {
            return;
        };
        let Some(result) = tick(&mut game.world, &mut game.phase, &self.config.tick) else {
            if game.phase == MatchPhase::Playing {
                info!("Countdown finished, simulation starts at tick {}", game.world.tick());
            }
            return;
        };

        let every = self.config.progress_log_every.max(1);
        if result.tick % every == 0 {
            debug!(
                "Tick {}: {} entities, {} moved, {} built",
                result.tick,
                game.world.entity_count(),
                result.movement.moved,
                result.movement.built.len()
            );
        }

        let packets: BTreeMap<u8, ServerPacket> = result
            .views
            .values()
            .map(|view| (view.player, tick_packet(result.tick, &snapshot(&game.world, view))))
            .collect();
        let observer = tick_packet(result.tick, &PlayerSnapshot::default());

        let targets: Vec<(ConnectionId, u8)> = self
            .connections
            .values()
            .filter(|c| c.stage == Stage::Playing)
            .filter_map(|c| c.identity.map(|index| (c.id, index)))
            .collect();
        for (id, index) in targets {
            let packet = packets.get(&index).unwrap_or(&observer);
            self.send(id, packet);
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Save the world if a game exists. Returns whether anything was written.
    pub fn save(&self, path: &Path) -> Result<bool, PersistError> {
        match &self.game {
            Some(game) => {
                save_world(&game.world, path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scenario_infos(&self) -> Vec<ScenarioInfo> {
        self.scenarios
            .iter()
            .map(|s| ScenarioInfo {
                name: s.name.clone(),
                description: s.description.clone(),
            })
            .collect()
    }
}

/// GameSetup describing a world.
pub fn game_setup(world: &World) -> GameSetup {
    let size = world.size();
    GameSetup {
        width: size.width,
        height: size.height,
        chunk_size: world.chunk_size(),
        tick: world.tick(),
        players: world
            .players()
            .map(|p| SetupPlayer {
                index: p.index,
                team: p.team,
                chunk_x: p.base_chunk.0,
                chunk_y: p.base_chunk.1,
            })
            .collect(),
    }
}

/// Tick packet for one player's snapshot.
pub fn tick_packet(tick: i32, snap: &PlayerSnapshot) -> ServerPacket {
    let mut packet = TickPacket {
        tick,
        owned: snap.owned.iter().map(EntityRecord::from).collect(),
        foreign: snap.foreign.iter().map(EntityRecord::from).collect(),
        tiles: snap.tiles.iter().map(|&t| TileRecord::from(t)).collect(),
    };
    let dropped = packet.fit_to_frame();
    if dropped > 0 {
        warn!("Tick {} view cut by {} records to fit one frame", tick, dropped);
    }
    ServerPacket::Tick(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::Coord;
    use crate::game::entity::Move;
    use crate::game::tile::Tile;
    use crate::network::memory::{memory_link, MemoryPeer};

    fn session_with(countdown_ticks: u16) -> Session {
        let config = SessionConfig {
            countdown_ticks,
            ..SessionConfig::default()
        };
        Session::new(config, ScenarioRegistry::builtin())
    }

    fn connect(session: &mut Session) -> (ConnectionId, MemoryPeer) {
        let (link, peer) = memory_link();
        let id = session.add_connection("memory", Box::new(link));
        (id, peer)
    }

    fn hello(key: u8, name: &str) -> ClientPacket {
        ClientPacket::Hello {
            version: PROTOCOL_VERSION.to_string(),
            key: [key; 16],
            name: name.to_string(),
        }
    }

    fn step(session: &mut Session) {
        session.poll();
        session.flush();
    }

    fn join(session: &mut Session, key: u8, name: &str) -> (ConnectionId, MemoryPeer) {
        let (id, mut peer) = connect(session);
        peer.send(&hello(key, name)).unwrap();
        step(session);
        peer.receive().unwrap();
        (id, peer)
    }

    fn kick_reason(packets: &[ServerPacket]) -> Option<String> {
        packets.iter().find_map(|p| match p {
            ServerPacket::Kick { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_first_handshake_becomes_host() {
        let mut session = session_with(0);
        let (id, mut peer) = connect(&mut session);
        peer.send(&hello(1, "alice")).unwrap();
        step(&mut session);

        let packets = peer.receive().unwrap();
        match &packets[0] {
            ServerPacket::Welcome { player_index, stage: WelcomeStage::Lobby { scenarios } } => {
                assert_eq!(*player_index, 0);
                assert_eq!(scenarios.len(), 3);
            }
            other => panic!("expected lobby welcome, got {:?}", other),
        }
        match &packets[1] {
            ServerPacket::PeerList { peers } => {
                assert_eq!(peers.len(), 1);
                assert!(peers[0].is_host() && peers[0].is_online());
            }
            other => panic!("expected peer list, got {:?}", other),
        }
        assert_eq!(session.connection(id).unwrap().stage, Stage::Lobby);
    }

    #[test]
    fn test_second_identity_gets_next_index() {
        let mut session = session_with(0);
        join(&mut session, 1, "alice");
        let (id, _) = join(&mut session, 2, "bob");

        let conn = session.connection(id).unwrap();
        assert_eq!(conn.identity, Some(1));
        assert!(!session.identities().get(1).unwrap().is_host);
    }

    #[test]
    fn test_online_key_rejected_original_untouched() {
        let mut session = session_with(0);
        let (first, _) = join(&mut session, 1, "alice");

        let (second, mut intruder) = connect(&mut session);
        intruder.send(&hello(1, "mallory")).unwrap();
        step(&mut session);

        let reason = kick_reason(&intruder.receive().unwrap()).unwrap();
        assert!(reason.contains("already connected"));
        assert!(session.connection(second).is_none());

        let original = session.connection(first).unwrap();
        assert_eq!(original.stage, Stage::Lobby);
        assert_eq!(original.identity, Some(0));
        assert!(session.identities().get(0).unwrap().is_online);
        assert_eq!(session.identities().get(0).unwrap().name, "alice");
    }

    #[test]
    fn test_version_mismatch_kicked() {
        let mut session = session_with(0);
        let (id, mut peer) = connect(&mut session);
        peer.send(&ClientPacket::Hello {
            version: "robofront/0".into(),
            key: [1; 16],
            name: "old".into(),
        })
        .unwrap();
        step(&mut session);

        assert!(kick_reason(&peer.receive().unwrap()).unwrap().contains("version"));
        assert!(session.connection(id).is_none());
        assert!(session.identities().is_empty());
    }

    #[test]
    fn test_packet_before_handshake_kicked() {
        let mut session = session_with(0);
        let (_, mut peer) = connect(&mut session);
        peer.send(&ClientPacket::Chat { text: "hi".into() }).unwrap();
        step(&mut session);
        assert!(kick_reason(&peer.receive().unwrap()).is_some());
        assert_eq!(session.connection_count(), 0);
    }

    #[test]
    fn test_malformed_payload_kicked() {
        let mut session = session_with(0);
        let (_, mut peer) = join(&mut session, 1, "alice");
        peer.send_raw(&[0, 3, 1, 0, 9]);
        step(&mut session);

        let reason = kick_reason(&peer.receive().unwrap()).unwrap();
        assert!(reason.contains("malformed"));
        assert!(!session.identities().get(0).unwrap().is_online);
    }

    #[test]
    fn test_kick_notifies_others() {
        let mut session = session_with(0);
        let (_, mut alice) = join(&mut session, 1, "alice");
        let (_, mut bob) = join(&mut session, 2, "bob");
        alice.receive().unwrap();

        bob.send(&ClientPacket::StartGame).unwrap();
        step(&mut session);

        assert!(kick_reason(&bob.receive().unwrap()).unwrap().contains("only the host"));
        let packets = alice.receive().unwrap();
        let peers = packets
            .iter()
            .find_map(|p| match p {
                ServerPacket::PeerList { peers } => Some(peers.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!peers[1].is_online());
        assert!(peers[0].is_online());
    }

    #[test]
    fn test_unknown_scenario_kicked() {
        let mut session = session_with(0);
        let (_, mut alice) = join(&mut session, 1, "alice");
        alice.send(&ClientPacket::ChooseGame { scenario: "atlantis".into() }).unwrap();
        step(&mut session);
        assert!(kick_reason(&alice.receive().unwrap()).unwrap().contains("atlantis"));
    }

    #[test]
    fn test_start_without_ready_chats_host() {
        let mut session = session_with(0);
        let (_, mut alice) = join(&mut session, 1, "alice");

        alice.send(&ClientPacket::StartGame).unwrap();
        step(&mut session);
        let packets = alice.receive().unwrap();
        assert!(matches!(
            &packets[0],
            ServerPacket::Chat { sender, .. } if sender == SERVER_SENDER
        ));

        alice.send(&ClientPacket::ChooseGame { scenario: "duel".into() }).unwrap();
        alice.send(&ClientPacket::StartGame).unwrap();
        step(&mut session);
        let packets = alice.receive().unwrap();
        assert!(matches!(&packets[0], ServerPacket::SetScenario { name, .. } if name == "duel"));
        assert!(matches!(&packets[1], ServerPacket::Chat { text, .. } if text.contains("alice")));
        assert_eq!(session.stage(), ServerStage::Lobby);
        assert_eq!(session.chosen_scenario(), Some("duel"));
    }

    #[test]
    fn test_chat_relayed_with_sender() {
        let mut session = session_with(0);
        let (_, mut alice) = join(&mut session, 1, "alice");
        let (_, mut bob) = join(&mut session, 2, "bob");
        alice.receive().unwrap();

        bob.send(&ClientPacket::Chat { text: "hello".into() }).unwrap();
        step(&mut session);

        let expected = ServerPacket::Chat { sender: "bob".into(), text: "hello".into() };
        assert_eq!(alice.receive().unwrap(), vec![expected.clone()]);
        assert_eq!(bob.receive().unwrap(), vec![expected]);
    }

    #[test]
    fn test_max_length_chat_relayed_within_one_frame() {
        let mut session = session_with(0);
        let (_, mut alice) = join(&mut session, 1, "alice");
        let (_, mut bob) = join(&mut session, 2, "bob");
        alice.receive().unwrap();

        bob.send(&ClientPacket::Chat { text: "x".repeat(65532) }).unwrap();
        step(&mut session);

        let packets = alice.receive().unwrap();
        match &packets[..] {
            [ServerPacket::Chat { sender, text }] => {
                assert_eq!(sender, "bob");
                assert_eq!(text.len(), 65528);
            }
            other => panic!("expected one chat line, got {} packets", other.len()),
        }
        assert_eq!(bob.receive().unwrap().len(), 1);
        assert_eq!(session.failed_sends(), 0);
    }

    #[test]
    fn test_tick_packet_for_large_view_still_frames() {
        let snap = PlayerSnapshot {
            owned: vec![],
            foreign: vec![],
            tiles: vec![(Coord::new(0, 0), Tile::Path); 20_000],
        };
        let packet = tick_packet(3, &snap);
        assert!(matches!(&packet, ServerPacket::Tick(t) if t.tiles.len() == 13_104));
        assert!(packet.to_frame().is_ok());
    }

    fn started(countdown: u16) -> (Session, MemoryPeer) {
        let mut session = session_with(countdown);
        let (_, mut alice) = join(&mut session, 1, "alice");
        alice.send(&ClientPacket::ChooseGame { scenario: "duel".into() }).unwrap();
        alice.send(&ClientPacket::SetReady { ready: true }).unwrap();
        alice.send(&ClientPacket::StartGame).unwrap();
        step(&mut session);
        alice.receive().unwrap();
        (session, alice)
    }

    fn robot_of(session: &Session, player: u8) -> crate::game::entity::Entity {
        let world = session.world().unwrap();
        world
            .player(player)
            .unwrap()
            .entities
            .iter()
            .filter_map(|id| world.entity(*id))
            .find(|e| e.kind == crate::game::entity::EntityType::Robot)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_stale_plan_moves_dropped() {
        let (mut session, mut alice) = started(0);
        let robot = robot_of(&session, 0);

        alice
            .send(&ClientPacket::PlanMoves {
                tick: 99,
                moves: vec![PlannedMove { entity: robot.id, mv: Move::Forward }],
            })
            .unwrap();
        step(&mut session);

        assert!(kick_reason(&alice.receive().unwrap()).is_none());
        assert_eq!(session.world().unwrap().entity(robot.id).unwrap().upcoming_move, Move::Idle);
    }

    #[test]
    fn test_plan_moves_resolved_on_tick() {
        let (mut session, mut alice) = started(0);
        let robot = robot_of(&session, 0);

        alice
            .send(&ClientPacket::PlanMoves {
                tick: 0,
                moves: vec![PlannedMove { entity: robot.id, mv: Move::Forward }],
            })
            .unwrap();
        step(&mut session);
        session.on_interval();
        session.flush();

        let moved = session.world().unwrap().entity(robot.id).unwrap().clone();
        assert_eq!(moved.pos, robot.pos.offset(1, 0));
        assert_eq!(moved.upcoming_move, Move::Idle);

        let packets = alice.receive().unwrap();
        match &packets[0] {
            ServerPacket::Tick(t) => {
                assert_eq!(t.tick, 1);
                assert_eq!(t.owned.len(), 3);
                assert!(t.owned.iter().any(|r| r.id == robot.id && r.x as i32 == moved.pos.x));
            }
            other => panic!("expected tick, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_entity_moves_skipped() {
        let (mut session, mut alice) = started(0);
        alice
            .send(&ClientPacket::PlanMoves {
                tick: 0,
                moves: vec![PlannedMove { entity: 999, mv: Move::Forward }],
            })
            .unwrap();
        step(&mut session);
        assert!(kick_reason(&alice.receive().unwrap()).is_none());
    }

    #[test]
    fn test_countdown_delays_first_tick() {
        let (mut session, mut alice) = started(2);
        assert_eq!(session.phase(), Some(MatchPhase::Countdown { ticks_remaining: 2 }));

        session.on_interval();
        session.on_interval();
        session.flush();
        assert!(alice.receive().unwrap().is_empty());
        assert_eq!(session.phase(), Some(MatchPhase::Playing));

        session.on_interval();
        session.flush();
        assert!(matches!(&alice.receive().unwrap()[0], ServerPacket::Tick(t) if t.tick == 1));
    }

    #[test]
    fn test_late_joiner_gets_playing_welcome_and_base() {
        let (mut session, _alice) = started(0);
        let (id, mut bob) = connect(&mut session);
        bob.send(&hello(2, "bob")).unwrap();
        step(&mut session);

        let packets = bob.receive().unwrap();
        match &packets[0] {
            ServerPacket::Welcome { player_index: 1, stage: WelcomeStage::Playing { setup } } => {
                assert_eq!(setup.players.len(), 2);
                assert_eq!(setup.width, 32);
            }
            other => panic!("expected playing welcome, got {:?}", other),
        }
        assert_eq!(session.connection(id).unwrap().stage, Stage::Playing);
        assert_eq!(session.world().unwrap().player(1).unwrap().entities.len(), 3);
    }

    #[test]
    fn test_lobby_packet_while_playing_kicked() {
        let (mut session, mut alice) = started(0);
        alice.send(&ClientPacket::SetReady { ready: false }).unwrap();
        step(&mut session);
        assert!(kick_reason(&alice.receive().unwrap()).is_some());
        assert_eq!(session.stage(), ServerStage::Playing);
    }

    #[test]
    fn test_disconnect_marks_offline() {
        let mut session = session_with(0);
        let (_, mut alice) = join(&mut session, 1, "alice");
        let (_, bob) = join(&mut session, 2, "bob");
        alice.receive().unwrap();

        bob.close();
        step(&mut session);

        assert!(!session.identities().get(1).unwrap().is_online);
        assert_eq!(session.connection_count(), 1);
        assert!(matches!(&alice.receive().unwrap()[0], ServerPacket::PeerList { .. }));
    }

    #[test]
    fn test_reconnect_by_key() {
        let mut session = session_with(0);
        let (_, alice) = join(&mut session, 1, "alice");
        alice.close();
        step(&mut session);

        let (id, _) = join(&mut session, 1, "alice");
        assert_eq!(session.connection(id).unwrap().identity, Some(0));
        assert!(session.identities().get(0).unwrap().is_host);
    }

    #[test]
    fn test_failed_write_counted_and_closed() {
        let mut session = session_with(0);
        let (_, alice) = join(&mut session, 1, "alice");
        alice.break_pipe();
        alice.send(&ClientPacket::Chat { text: "x".into() }).unwrap();
        step(&mut session);

        assert_eq!(session.failed_sends(), 1);
        assert!(!session.identities().get(0).unwrap().is_online);
    }

    #[test]
    fn test_outbox_cap_drops_sends() {
        let config = SessionConfig {
            max_outbox_bytes: 4,
            ..SessionConfig::default()
        };
        let mut session = Session::new(config, ScenarioRegistry::builtin());
        let (_, peer) = connect(&mut session);
        peer.send(&hello(1, "alice")).unwrap();
        step(&mut session);
        assert!(session.failed_sends() >= 1);
    }

    #[test]
    fn test_restore_world() {
        let (session, _) = started(0);
        let world = session.world().unwrap().clone();

        let mut resumed = session_with(0);
        resumed.restore(world);
        assert_eq!(resumed.stage(), ServerStage::Playing);
        let alice = resumed.identities().get(0).unwrap();
        assert!(!alice.is_online);
        assert!(alice.is_host);

        let (id, _) = join(&mut resumed, 1, "alice");
        assert_eq!(resumed.connection(id).unwrap().stage, Stage::Playing);
    }

    #[test]
    fn test_violation_reasons() {
        assert!(ProtocolViolation::Internal("x").reason().is_none());
        assert_eq!(
            ProtocolViolation::NotHost("start the game").reason().as_deref(),
            Some("only the host can start the game")
        );
    }
}
