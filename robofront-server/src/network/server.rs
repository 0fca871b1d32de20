//! Game Server
//!
//! Single task selecting over the tokio listener, a poll interval and the
//! shutdown signal. Each poll drains and dispatches every connection, runs
//! at most one tick and flushes outboxes. Sockets are read and written with
//! `try_read`/`try_write`, so the session itself never awaits.

use std::future::Future;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::game::persist::{load_world, PersistError};
use crate::game::scenario::{ScenarioError, ScenarioRegistry};
use crate::network::scheduler::TickScheduler;
use crate::network::session::{Session, SessionConfig};

// =============================================================================
// CONFIG
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: String,
    /// Simulation tick interval.
    pub tick_interval: Duration,
    /// Interval between socket polls.
    pub poll_interval: Duration,
    /// Intervals burnt before the first tick of a new game.
    pub countdown_ticks: u16,
    /// World file loaded at startup and written at shutdown.
    pub world_file: PathBuf,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Optional JSON file with extra scenarios.
    pub scenario_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".to_string(),
            tick_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(2),
            countdown_ticks: 6,
            world_file: PathBuf::from("world.bin"),
            max_connections: 64,
            scenario_file: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `ROBOFRONT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("ROBOFRONT_BIND").unwrap_or(defaults.bind_addr),
            tick_interval: Duration::from_millis(env_parse(
                "ROBOFRONT_TICK_MS",
                defaults.tick_interval.as_millis() as u64,
            )),
            poll_interval: Duration::from_millis(env_parse(
                "ROBOFRONT_POLL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            countdown_ticks: env_parse("ROBOFRONT_COUNTDOWN_TICKS", defaults.countdown_ticks),
            world_file: std::env::var("ROBOFRONT_WORLD_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.world_file),
            max_connections: env_parse("ROBOFRONT_MAX_CONNECTIONS", defaults.max_connections),
            scenario_file: std::env::var("ROBOFRONT_SCENARIO_FILE").ok().map(PathBuf::from),
        }
    }

    /// Session settings derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            countdown_ticks: self.countdown_ticks,
            ..SessionConfig::default()
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Game server errors. All of them are fatal at startup or shutdown.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or configure the listener.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address.
        addr: String,
        /// Cause.
        source: io::Error,
    },

    /// World file could not be loaded or saved.
    #[error("World persistence failed: {0}")]
    Persist(#[from] PersistError),

    /// Scenario file could not be loaded.
    #[error("Scenario loading failed: {0}")]
    Scenario(#[from] ScenarioError),
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Accepted socket as a session [`Link`](crate::network::connection::Link).
///
/// `try_read`/`try_write` report `WouldBlock` until the runtime has seen
/// readiness, which is what the framer and outbox expect.
struct TcpLink(TcpStream);

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The authoritative server: listener, session, scheduler.
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    session: Session,
    scheduler: TickScheduler,
}

impl GameServer {
    /// Load scenarios and the saved world, then bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let mut scenarios = ScenarioRegistry::builtin();
        if let Some(path) = &config.scenario_file {
            let count = scenarios.load_file(path)?;
            info!("Loaded {} scenarios from {}", count, path.display());
        }

        let mut session = Session::new(config.session_config(), scenarios);
        if let Some(world) = load_world(&config.world_file)? {
            session.restore(world);
        }

        let bind_error = |source| ServerError::Bind {
            addr: config.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&config.bind_addr).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        info!("Game server listening on {}", local);

        Ok(Self {
            scheduler: TickScheduler::new(config.tick_interval, Instant::now()),
            config,
            listener,
            session,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!("Accept error: {}", e);
                return;
            }
        };
        if self.session.connection_count() >= self.config.max_connections {
            warn!("Connection limit reached, rejecting {}", addr);
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        self.session.add_connection(addr.to_string(), Box::new(TcpLink(stream)));
    }

    /// Read and dispatch, maybe tick, flush.
    fn poll_once(&mut self, now: Instant) {
        self.session.poll();
        if self.scheduler.poll(now) {
            self.session.on_interval();
        }
        self.session.flush();
    }

    /// Run until `shutdown` resolves, then persist the world.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future,
    {
        tokio::pin!(shutdown);
        let mut poll_timer = interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = self.listener.accept() => self.on_accept(accepted),
                now = poll_timer.tick() => self.poll_once(now.into_std()),
            }
        }
        self.shutdown()
    }

    /// Flush what is queued, save the world and close the listener.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.session.flush();
        if self.session.save(&self.config.world_file)? {
            info!("World saved to {}", self.config.world_file.display());
        } else {
            debug!("No game running, nothing to save");
        }
        info!(
            "Server stopped ({} failed sends during session)",
            self.session.failed_sends()
        );
        Ok(())
    }
}
