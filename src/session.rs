//! Player identities, reconnection tokens and connection bookkeeping.

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::game::{GameSession, Seat, SeatStatus};
use crate::protocol::Message;
use crate::spectator::{SpectatorHub, SpectatorId};

/// Identity of a player, allocated on a "new" join starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {}", self.0)
    }
}

/// Eight random bytes proving ownership of a seat on reconnection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken([u8; 8]);

impl SessionToken {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session token must be 16 hex characters")]
pub struct TokenParseError;

impl FromStr for SessionToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 || !s.is_ascii() {
            return Err(TokenParseError);
        }
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| TokenParseError)?;
        }
        Ok(Self(bytes))
    }
}

/// What a client presents to reclaim its seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: UserId,
    pub token: SessionToken,
}

/// Process-unique id of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a message could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection task is gone.
    Closed,
    /// The peer stopped draining its queue.
    Lagging,
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbox: mpsc::Sender<Message>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue `msg` without waiting.
    pub fn deliver(&self, msg: Message) -> Result<(), DeliveryError> {
        self.outbox.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("both seats are taken")]
    SessionFull,
    #[error("unknown user or wrong session token")]
    InvalidCredentials,
    #[error("a session token was already issued to {0} for this game")]
    TokenAlreadyIssued(UserId),
    #[error("{0} is not registered")]
    UnknownUser(UserId),
}

#[derive(Debug)]
struct PlayerRecord {
    token: Option<SessionToken>,
    connection: Option<ConnectionHandle>,
}

/// Persisted part of a player registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub user: UserId,
    pub token: Option<SessionToken>,
}

/// Tracks every registered player: user id, token and live connection.
///
/// Tokens are drawn from an OS-seeded `StdRng` and are unique among live
/// registrations. A token is issued at most once per game per player.
pub struct SessionRegistry {
    rng: StdRng,
    next_user: u64,
    players: HashMap<UserId, PlayerRecord>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            next_user: 1,
            players: HashMap::new(),
            by_connection: HashMap::new(),
        }
    }

    /// Rebuild from persisted records. No player has a connection yet.
    pub fn restore(records: Vec<TokenRecord>, next_user: u64) -> Self {
        let mut registry = Self::new();
        registry.next_user = next_user.max(1);
        for record in records {
            registry.players.insert(
                record.user,
                PlayerRecord {
                    token: record.token,
                    connection: None,
                },
            );
        }
        registry
    }

    /// Give a newcomer a user id and a free seat in `game`.
    pub fn register_new_player(
        &mut self,
        game: &mut GameSession,
        connection: ConnectionHandle,
    ) -> Result<(UserId, Seat), SessionError> {
        let user = UserId(self.next_user);
        // A seat that is free but not yet claimable (rematch pending) reads as full.
        let seat = game.claim_seat(user).map_err(|e| {
            log::debug!("seat refused for new player: {}", e);
            SessionError::SessionFull
        })?;
        self.next_user += 1;
        self.by_connection.insert(connection.id(), user);
        self.players.insert(
            user,
            PlayerRecord {
                token: None,
                connection: Some(connection),
            },
        );
        log::info!("{} registered at {}", user, seat);
        Ok((user, seat))
    }

    /// Issue `user`'s reconnection token for the current game.
    pub fn issue_token(&mut self, user: UserId) -> Result<SessionToken, SessionError> {
        let in_use: Vec<SessionToken> = self.players.values().filter_map(|r| r.token).collect();
        let record = self
            .players
            .get_mut(&user)
            .ok_or(SessionError::UnknownUser(user))?;
        if record.token.is_some() {
            return Err(SessionError::TokenAlreadyIssued(user));
        }
        let token = loop {
            let candidate = SessionToken(self.rng.random());
            if !in_use.contains(&candidate) {
                break candidate;
            }
        };
        record.token = Some(token);
        log::debug!("issued session token to {}", user);
        Ok(token)
    }

    /// Reattach `user` to `game` over a new connection.
    ///
    /// The token must match and the seat must be disconnected. Board, turn
    /// and phase are left exactly as they were.
    pub fn reconnect(
        &mut self,
        game: &mut GameSession,
        user: UserId,
        token: SessionToken,
        connection: ConnectionHandle,
    ) -> Result<(), SessionError> {
        let record = self
            .players
            .get_mut(&user)
            .ok_or(SessionError::InvalidCredentials)?;
        if record.token != Some(token) {
            log::warn!("rejected reconnection attempt for {}", user);
            return Err(SessionError::InvalidCredentials);
        }
        let seat = game.seat_of(user).ok_or(SessionError::InvalidCredentials)?;
        if !matches!(game.seat_status(seat), SeatStatus::Disconnected { .. }) {
            return Err(SessionError::InvalidCredentials);
        }
        game.mark_connected(user)
            .map_err(|_| SessionError::InvalidCredentials)?;
        if let Some(old) = record.connection.replace(connection.clone()) {
            self.by_connection.remove(&old.id());
        }
        self.by_connection.insert(connection.id(), user);
        log::info!("{} reconnected on {}", user, connection.id());
        Ok(())
    }

    /// Add a spectator to `hub`. Always succeeds.
    pub fn register_spectator(
        &mut self,
        hub: &mut SpectatorHub,
        connection: ConnectionHandle,
    ) -> SpectatorId {
        hub.subscribe(connection)
    }

    /// Detach whatever player was using `connection`.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Option<UserId> {
        let user = self.by_connection.remove(&connection)?;
        if let Some(record) = self.players.get_mut(&user) {
            if record.connection.as_ref().map(ConnectionHandle::id) == Some(connection) {
                record.connection = None;
            }
        }
        Some(user)
    }

    /// Forget `user` entirely, token included.
    pub fn remove(&mut self, user: UserId) -> Option<ConnectionHandle> {
        let record = self.players.remove(&user)?;
        if let Some(conn) = &record.connection {
            self.by_connection.remove(&conn.id());
        }
        log::debug!("{} removed from registry", user);
        record.connection
    }

    /// Invalidate every token; a new game issues fresh ones.
    pub fn revoke_tokens(&mut self) {
        for record in self.players.values_mut() {
            record.token = None;
        }
    }

    pub fn user_for(&self, connection: ConnectionId) -> Option<UserId> {
        self.by_connection.get(&connection).copied()
    }

    pub fn connection(&self, user: UserId) -> Option<&ConnectionHandle> {
        self.players.get(&user).and_then(|r| r.connection.as_ref())
    }

    pub fn token(&self, user: UserId) -> Option<SessionToken> {
        self.players.get(&user).and_then(|r| r.token)
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.players.contains_key(&user)
    }

    pub fn next_user_id(&self) -> u64 {
        self.next_user
    }

    pub fn records(&self) -> Vec<TokenRecord> {
        let mut records: Vec<TokenRecord> = self
            .players
            .iter()
            .map(|(user, r)| TokenRecord {
                user: *user,
                token: r.token,
            })
            .collect();
        records.sort_by_key(|r| r.user);
        records
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
