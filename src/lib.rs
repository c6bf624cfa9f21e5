mod bitboard;
mod board;
pub mod client;
mod common;
mod config;
mod game;
pub mod lobby;
mod logging;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod session;
mod ship;
pub mod spectator;
pub mod transport;

pub use bitboard::{BitBoard, BitBoardError};
pub use board::*;
pub use client::{Bot, BotSummary, Client, ClientSession, ClientState, Role};
pub use common::*;
pub use config::*;
pub use game::*;
pub use lobby::Lobby;
pub use logging::{init_logging, init_with_level};
pub use persistence::{FileStore, MemoryStore, PersistedSession, SnapshotStore, StoreError};
pub use protocol::{JoinRequest, Message, Rejection, Welcome, PROTOCOL_VERSION};
pub use server::{LobbyHandle, Server};
pub use session::{ConnectionId, Credentials, SessionRegistry, SessionToken, UserId};
pub use ship::*;
pub use spectator::SpectatorHub;
pub use transport::{HeartbeatTransport, InMemoryTransport, TcpTransport, Transport};
