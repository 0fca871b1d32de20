//! Network Layer
//!
//! Framing, binary protocol, connection state machine and the server loop.
//! This layer is **non-deterministic**: it deals with sockets and wall-clock
//! time, while all simulation runs through `game/`.

pub mod codec;
pub mod connection;
pub mod framing;
pub mod identity;
#[cfg(test)]
mod memory;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;

pub use codec::{DecodeError, Decoder, Encoder};
pub use connection::{Connection, ConnectionId, Link, Stage};
pub use framing::{FrameError, FrameReader, FrameWriter, ReadStatus};
pub use identity::{IdentityError, IdentityRegistry, PlayerIdentity};
pub use protocol::{ClientPacket, ServerPacket};
pub use scheduler::{TickAccumulator, TickScheduler};
pub use server::{GameServer, ServerConfig, ServerError};
pub use session::{ProtocolViolation, ServerStage, Session, SessionConfig};
