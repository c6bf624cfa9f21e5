//! Messages exchanged between the server and its clients.
//!
//! Every frame on the wire carries exactly one [`Message`]. A connection
//! opens with `Handshake`/`HandshakeAck`, then the client sends `Join`.

use serde::{Deserialize, Serialize};

use crate::common::{BoardError, Coord, Orientation};
use crate::game::{GameError, GamePhase, PlacementAck, Seat, SessionView, VersionedEvent};
use crate::session::{ConnectionId, Credentials, SessionError, UserId};

/// Bumped whenever the `Message` layout changes.
pub const PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Handshake { version: u16 },
    HandshakeAck { version: u16 },
    Heartbeat { version: u16 },

    // Client actions.
    Join(JoinRequest),
    /// Place the next ship of the fleet with its bow at `coord`.
    PlaceShip { coord: Coord, orientation: Orientation },
    Finalize,
    Fire { coord: Coord },
    RematchVote { accept: bool },
    Leave,

    // Server replies and events.
    Welcome(Welcome),
    Rejected(Rejection),
    PlacementAck(PlacementAck),
    /// Credentials to present when reconnecting. Sent once per game, after
    /// the player finalizes placement.
    TokenIssued(Credentials),
    Event(VersionedEvent),
    Snapshot(SessionView),
    /// Last message before the server stops; the connection closes next.
    ServerClosing,
}

impl Message {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake { .. } => "Handshake",
            Message::HandshakeAck { .. } => "HandshakeAck",
            Message::Heartbeat { .. } => "Heartbeat",
            Message::Join(_) => "Join",
            Message::PlaceShip { .. } => "PlaceShip",
            Message::Finalize => "Finalize",
            Message::Fire { .. } => "Fire",
            Message::RematchVote { .. } => "RematchVote",
            Message::Leave => "Leave",
            Message::Welcome(_) => "Welcome",
            Message::Rejected(_) => "Rejected",
            Message::PlacementAck(_) => "PlacementAck",
            Message::TokenIssued(_) => "TokenIssued",
            Message::Event(_) => "Event",
            Message::Snapshot(_) => "Snapshot",
            Message::ServerClosing => "ServerClosing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinRequest {
    /// Take a free seat. Presenting old credentials abandons that seat first.
    New { abandon: Option<Credentials> },
    Reconnect(Credentials),
    Spectator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Welcome {
    Player { user: UserId, seat: Seat },
    Reconnected { user: UserId, seat: Seat },
    Spectator { id: ConnectionId },
}

/// Why a request was refused. The session is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Rejection {
    #[error("both seats are taken; join as a spectator instead")]
    SessionFull,
    #[error("unknown user or wrong session token")]
    InvalidCredentials,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("action not allowed while {0}")]
    InvalidState(GamePhase),
    #[error("coordinate is out of bounds")]
    OutOfBounds,
    #[error("ship placement overlaps with another ship")]
    Overlap,
    #[error("not all ships of the fleet have been placed")]
    IncompleteFleet,
    #[error("that cell has already been shot")]
    AlreadyShot,
    #[error("ship {0} is not part of the remaining fleet")]
    NotInFleet(String),
    #[error("ship placement is already finalized")]
    PlacementLocked,
    #[error("every ship is already placed")]
    FleetComplete,
    #[error("spectators cannot act on the game")]
    NotPermitted,
    #[error("you are not seated in this game")]
    NotSeated,
    #[error("send Join first")]
    NotJoined,
    #[error("this connection has already joined")]
    AlreadyJoined,
    #[error("unexpected {0} message")]
    Unexpected(String),
}

impl From<BoardError> for Rejection {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::OutOfBounds | BoardError::BitBoard(_) => Rejection::OutOfBounds,
            BoardError::Overlap => Rejection::Overlap,
            BoardError::IncompleteFleet => Rejection::IncompleteFleet,
            BoardError::NotInFleet(name) => Rejection::NotInFleet(name),
            BoardError::PlacementLocked => Rejection::PlacementLocked,
        }
    }
}

impl From<GameError> for Rejection {
    fn from(err: GameError) -> Self {
        match err {
            GameError::NotYourTurn => Rejection::NotYourTurn,
            GameError::InvalidState(phase) => Rejection::InvalidState(phase),
            GameError::AlreadyShot => Rejection::AlreadyShot,
            GameError::NotSeated => Rejection::NotSeated,
            GameError::SessionFull => Rejection::SessionFull,
            GameError::FleetComplete => Rejection::FleetComplete,
            GameError::Board(e) => e.into(),
        }
    }
}

impl From<SessionError> for Rejection {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionFull => Rejection::SessionFull,
            SessionError::InvalidCredentials | SessionError::UnknownUser(_) => {
                Rejection::InvalidCredentials
            }
            SessionError::TokenAlreadyIssued(_) => Rejection::PlacementLocked,
        }
    }
}
