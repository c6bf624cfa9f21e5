//! The single owner of all shared server state.
//!
//! `Lobby` ties together the [`GameSession`], the [`SessionRegistry`] and the
//! [`SpectatorHub`]. It classifies joins, routes player actions, applies the
//! disconnect and forfeit policies and delivers every resulting message. It
//! is synchronous; the server actor drives it from one task and persists a
//! snapshot whenever [`Lobby::take_dirty`] reports a change.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::GameConfig;
use crate::game::{
    GameEvent, GamePhase, GameSession, Perspective, RematchOutcome, SessionView, TurnTimeout,
    VersionedEvent,
};
use crate::persistence::PersistedSession;
use crate::protocol::{JoinRequest, Message, Rejection, Welcome};
use crate::session::{ConnectionHandle, ConnectionId, Credentials, SessionRegistry, UserId};
use crate::spectator::{SpectatorHub, SpectatorId};

pub struct Lobby {
    game: GameSession,
    registry: SessionRegistry,
    hub: SpectatorHub,
    /// Spectators who asked to take a seat freed by a declined rematch,
    /// in the order they asked.
    volunteers: VecDeque<SpectatorId>,
    /// Connections released during the current command. They still receive
    /// the events it produced, then their queue is closed.
    departed: Vec<ConnectionHandle>,
    reconnect_grace: Option<Duration>,
    turn_timeout: Option<Duration>,
    rematch_timeout: Option<Duration>,
    dirty: bool,
}

impl Lobby {
    pub fn new(config: GameConfig, reconnect_grace: Option<Duration>) -> Self {
        Self {
            game: GameSession::new(config),
            registry: SessionRegistry::new(),
            hub: SpectatorHub::new(),
            volunteers: VecDeque::new(),
            departed: Vec::new(),
            reconnect_grace,
            turn_timeout: None,
            rematch_timeout: None,
            dirty: false,
        }
    }

    /// Resume a persisted session. Seated players come back disconnected;
    /// any who never received a token cannot reconnect and lose their seat.
    pub fn restore(persisted: PersistedSession, reconnect_grace: Option<Duration>) -> Self {
        let mut lobby = Self {
            game: GameSession::restore(persisted.game),
            registry: SessionRegistry::restore(persisted.tokens, persisted.next_user_id),
            hub: SpectatorHub::new(),
            volunteers: VecDeque::new(),
            departed: Vec::new(),
            reconnect_grace,
            turn_timeout: None,
            rematch_timeout: None,
            dirty: false,
        };
        let stranded: Vec<UserId> = lobby
            .game
            .players()
            .filter(|u| lobby.registry.token(*u).is_none())
            .collect();
        for user in stranded {
            log::info!("{} had no session token; freeing the seat", user);
            lobby.drop_player(user);
        }
        lobby.game.take_events();
        log::info!(
            "restored session at version {} ({})",
            lobby.game.version(),
            lobby.game.phase()
        );
        lobby
    }

    /// Limit how long the player to move may take.
    pub fn with_turn_timeout(mut self, limit: Option<Duration>) -> Self {
        self.turn_timeout = limit;
        self
    }

    /// Limit how long the rematch poll waits for answers.
    pub fn with_rematch_timeout(mut self, limit: Option<Duration>) -> Self {
        self.rematch_timeout = limit;
        self
    }

    pub fn game(&self) -> &GameSession {
        &self.game
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &SpectatorHub {
        &self.hub
    }

    pub fn view(&self, perspective: Perspective) -> SessionView {
        self.game.view(perspective)
    }

    pub fn persisted(&self) -> PersistedSession {
        PersistedSession {
            game: self.game.snapshot(),
            tokens: self.registry.records(),
            next_user_id: self.registry.next_user_id(),
        }
    }

    /// Whether state changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn is_joined(&self, connection: ConnectionId) -> bool {
        self.registry.user_for(connection).is_some() || self.hub.contains(connection)
    }

    /// Classify and admit a new connection. A refusal is also delivered to
    /// `connection` as `Rejected`.
    pub fn join(
        &mut self,
        connection: ConnectionHandle,
        request: JoinRequest,
    ) -> Result<Welcome, Rejection> {
        let result = self.admit(connection.clone(), request);
        if let Err(rejection) = &result {
            log::info!("{} join refused: {}", connection.id(), rejection);
            let _ = connection.deliver(Message::Rejected(rejection.clone()));
        }
        self.flush();
        result
    }

    fn admit(
        &mut self,
        connection: ConnectionHandle,
        request: JoinRequest,
    ) -> Result<Welcome, Rejection> {
        if self.is_joined(connection.id()) {
            return Err(Rejection::AlreadyJoined);
        }
        match request {
            JoinRequest::Spectator => {
                let welcome = Welcome::Spectator { id: connection.id() };
                let _ = connection.deliver(Message::Welcome(welcome));
                let id = self
                    .registry
                    .register_spectator(&mut self.hub, connection);
                let turn = match (self.game.phase(), self.game.turn()) {
                    (GamePhase::InProgress, Some(user)) => Some(VersionedEvent {
                        version: self.game.version(),
                        event: GameEvent::TurnNotice { user },
                    }),
                    _ => None,
                };
                self.hub
                    .send_snapshot(id, self.game.view(Perspective::Spectator), turn);
                Ok(welcome)
            }
            JoinRequest::New { abandon } => {
                if let Some(old) = abandon {
                    self.abandon(old);
                }
                let (user, seat) = self
                    .registry
                    .register_new_player(&mut self.game, connection.clone())?;
                self.dirty = true;
                let welcome = Welcome::Player { user, seat };
                self.send_player(user, Message::Welcome(welcome));
                self.send_player(user, Message::Snapshot(self.game.view(Perspective::Player(user))));
                Ok(welcome)
            }
            JoinRequest::Reconnect(Credentials { user, token }) => {
                self.registry
                    .reconnect(&mut self.game, user, token, connection)?;
                self.dirty = true;
                let seat = self.game.seat_of(user).ok_or(Rejection::InvalidCredentials)?;
                let welcome = Welcome::Reconnected { user, seat };
                self.send_player(user, Message::Welcome(welcome));
                self.send_player(user, Message::Snapshot(self.game.view(Perspective::Player(user))));
                Ok(welcome)
            }
        }
    }

    /// A "new" join that presents valid old credentials gives that seat up.
    fn abandon(&mut self, old: Credentials) {
        if self.registry.token(old.user) == Some(old.token) {
            log::info!("{} abandoned their seat", old.user);
            self.drop_player(old.user);
        } else {
            log::debug!("ignoring stale credentials for {}", old.user);
        }
    }

    /// Route a message from an admitted connection.
    pub fn handle(&mut self, connection: ConnectionId, msg: Message) {
        let result = if let Some(user) = self.registry.user_for(connection) {
            self.player_action(user, msg)
        } else if self.hub.contains(connection) {
            self.spectator_action(connection, msg)
        } else {
            log::debug!("ignoring {} from unjoined {}", msg.kind(), connection);
            Ok(())
        };
        if let Err(rejection) = result {
            log::debug!("{} rejected: {}", connection, rejection);
            self.reply(connection, Message::Rejected(rejection));
        }
        self.flush();
    }

    fn player_action(&mut self, user: UserId, msg: Message) -> Result<(), Rejection> {
        match msg {
            Message::PlaceShip { coord, orientation } => {
                let ack = self.game.place_ship(user, coord, orientation)?;
                self.dirty = true;
                self.send_player(user, Message::PlacementAck(ack));
            }
            Message::Finalize => {
                self.game.finalize(user)?;
                self.dirty = true;
                match self.registry.issue_token(user) {
                    Ok(token) => {
                        self.send_player(user, Message::TokenIssued(Credentials { user, token }))
                    }
                    Err(e) => log::warn!("no token for {}: {}", user, e),
                }
            }
            Message::Fire { coord } => {
                let outcome = self.game.fire_at(user, coord)?;
                self.dirty = true;
                log::info!("{} fired at {}: {}", user, coord, outcome);
                if self.game.phase() == GamePhase::GameOver {
                    self.open_rematch();
                }
            }
            Message::RematchVote { accept } => {
                let outcome = self.game.vote_rematch(user, accept)?;
                self.dirty = true;
                self.settle_rematch(outcome);
            }
            Message::Leave => self.drop_player(user),
            Message::Heartbeat { .. } => {}
            Message::Join(_) => return Err(Rejection::AlreadyJoined),
            other => return Err(Rejection::Unexpected(other.kind().to_string())),
        }
        Ok(())
    }

    fn spectator_action(&mut self, id: SpectatorId, msg: Message) -> Result<(), Rejection> {
        match msg {
            Message::PlaceShip { .. } | Message::Finalize | Message::Fire { .. } => {
                Err(Rejection::NotPermitted)
            }
            Message::RematchVote { accept } => {
                if self.game.phase() != GamePhase::AwaitingRematch {
                    return Err(Rejection::InvalidState(self.game.phase()));
                }
                if !accept {
                    self.volunteers.retain(|v| *v != id);
                } else if !self.volunteers.contains(&id) {
                    log::info!("spectator {} volunteers to play", id);
                    self.volunteers.push_back(id);
                }
                Ok(())
            }
            Message::Leave => {
                self.remove_spectator(id);
                Ok(())
            }
            Message::Heartbeat { .. } => Ok(()),
            Message::Join(_) => Err(Rejection::AlreadyJoined),
            other => Err(Rejection::Unexpected(other.kind().to_string())),
        }
    }

    /// The connection behind `connection` is gone.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.connection_lost(connection);
        self.flush();
    }

    fn connection_lost(&mut self, connection: ConnectionId) {
        if self.hub.contains(connection) {
            self.remove_spectator(connection);
            return;
        }
        let Some(user) = self.registry.disconnect(connection) else {
            return;
        };
        self.dirty = true;
        if self.game.phase() == GamePhase::AwaitingRematch {
            log::info!("{} disconnected during the rematch poll; counted as a decline", user);
            match self.game.vote_rematch(user, false) {
                Ok(outcome) => self.settle_rematch(outcome),
                Err(e) => log::warn!("could not record decline for {}: {}", user, e),
            }
        } else if self.registry.token(user).is_none() {
            log::info!("{} disconnected before receiving a token", user);
            self.drop_player(user);
        } else {
            log::info!("{} disconnected; seat held for reconnection", user);
            if let Err(e) = self.game.mark_disconnected(user) {
                log::warn!("could not mark {} disconnected: {}", user, e);
            }
        }
    }

    /// Apply every clock that has run out by `now`: the reconnection grace,
    /// the turn clock and the rematch poll deadline.
    pub fn expire(&mut self, now: Instant) {
        if let Some(grace) = self.reconnect_grace {
            for user in self.game.expired_players(now, grace) {
                log::info!("{} did not reconnect within {:?}", user, grace);
                self.drop_player(user);
            }
        }
        if let Some(limit) = self.turn_timeout {
            match self.game.expire_turn(now, limit) {
                Some(TurnTimeout::Skipped { .. }) => self.dirty = true,
                Some(TurnTimeout::Forfeited { .. }) => {
                    self.dirty = true;
                    self.open_rematch();
                }
                None => {}
            }
        }
        if let Some(limit) = self.rematch_timeout {
            if let Some(outcome) = self.game.expire_rematch(now, limit) {
                self.dirty = true;
                self.settle_rematch(Some(outcome));
            }
        }
        self.flush();
    }

    /// Tell every player and spectator that the server is going away.
    /// Their queues close once the lobby is dropped.
    pub fn close(&mut self) {
        let players: Vec<UserId> = self.game.players().collect();
        for user in players {
            self.send_player(user, Message::ServerClosing);
        }
        self.hub.notify_all(Message::ServerClosing);
    }

    /// Take `user` out of the game for good. A running game is forfeited.
    fn drop_player(&mut self, user: UserId) {
        let phase = self.game.phase();
        let result = match phase {
            GamePhase::InProgress => self.game.forfeit(user).map(|_| self.open_rematch()),
            GamePhase::AwaitingRematch => self
                .game
                .vote_rematch(user, false)
                .map(|outcome| self.settle_rematch(outcome)),
            _ => self.game.vacate(user),
        };
        if let Err(e) = result {
            log::warn!("could not remove {} from the game: {}", user, e);
        }
        if phase == GamePhase::GameOver {
            self.registry.revoke_tokens();
        }
        if let Some(conn) = self.registry.remove(user) {
            self.departed.push(conn);
        }
        self.dirty = true;
    }

    fn open_rematch(&mut self) {
        match self.game.open_rematch() {
            Ok(outcome) => self.settle_rematch(outcome),
            Err(e) => log::warn!("could not open rematch poll: {}", e),
        }
    }

    fn settle_rematch(&mut self, outcome: Option<RematchOutcome>) {
        match outcome {
            None => return,
            Some(RematchOutcome::Restarted) => {
                log::info!("rematch accepted; placing ships again");
                self.registry.revoke_tokens();
                self.volunteers.clear();
            }
            Some(RematchOutcome::Reopened { vacated }) => {
                for user in vacated {
                    if let Some(conn) = self.registry.remove(user) {
                        self.departed.push(conn);
                    }
                }
                self.registry.revoke_tokens();
                self.promote_volunteers();
            }
        }
        // Boards were cleared: every remaining player gets a fresh view.
        let players: Vec<UserId> = self.game.players().collect();
        for user in players {
            self.send_player(user, Message::Snapshot(self.game.view(Perspective::Player(user))));
        }
    }

    /// Seat volunteering spectators, first come first served.
    fn promote_volunteers(&mut self) {
        while self.game.phase() == GamePhase::WaitingForPlayers && self.game.has_free_seat() {
            let Some(id) = self.volunteers.pop_front() else {
                break;
            };
            let Some(conn) = self.hub.take(id) else {
                continue;
            };
            match self.registry.register_new_player(&mut self.game, conn.clone()) {
                Ok((user, seat)) => {
                    log::info!("spectator {} promoted to {} at {}", id, user, seat);
                    self.send_player(user, Message::Welcome(Welcome::Player { user, seat }));
                }
                Err(e) => {
                    log::warn!("could not seat spectator {}: {}", id, e);
                    self.hub.subscribe(conn);
                    break;
                }
            }
        }
        self.volunteers.clear();
    }

    fn remove_spectator(&mut self, id: SpectatorId) {
        self.volunteers.retain(|v| *v != id);
        if self.hub.unsubscribe(id) {
            log::info!("spectator {} left", id);
        }
    }

    fn send_player(&self, user: UserId, msg: Message) {
        if let Some(conn) = self.registry.connection(user) {
            if conn.deliver(msg).is_err() {
                log::debug!("could not queue message for {}", user);
            }
        }
    }

    fn reply(&mut self, connection: ConnectionId, msg: Message) {
        if let Some(user) = self.registry.user_for(connection) {
            self.send_player(user, msg);
        } else {
            self.hub.notify(connection, msg);
        }
    }

    /// Deliver pending game events to the seated players, to connections
    /// released by this command and to every spectator, in emission order.
    fn flush(&mut self) {
        loop {
            let events = self.game.take_events();
            if !events.is_empty() {
                self.dirty = true;
            }
            let departed = std::mem::take(&mut self.departed);
            let players: Vec<UserId> = self.game.players().collect();
            let mut lost = Vec::new();
            for event in &events {
                for user in &players {
                    if let Some(conn) = self.registry.connection(*user) {
                        if conn.deliver(Message::Event(event.clone())).is_err() {
                            lost.push(conn.id());
                        }
                    }
                }
                for conn in &departed {
                    let _ = conn.deliver(Message::Event(event.clone()));
                }
                self.hub.broadcast(event);
            }
            lost.sort();
            lost.dedup();
            if lost.is_empty() && self.departed.is_empty() {
                break;
            }
            for connection in lost {
                log::warn!("{} stopped draining its queue; disconnecting", connection);
                self.connection_lost(connection);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Coord, Orientation};
    use crate::config::Fleet;
    use crate::ship::ShipType;
    use tokio::sync::mpsc;

    fn conn(id: u64) -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(64);
        (ConnectionHandle::new(ConnectionId(id), tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn one_skiff() -> GameConfig {
        GameConfig::with_fleet(Fleet::new(vec![ShipType::new("Skiff", 1)]).unwrap())
    }

    #[test]
    fn third_player_is_told_the_session_is_full() {
        let mut lobby = Lobby::new(one_skiff(), None);
        let (a, _ra) = conn(1);
        let (b, _rb) = conn(2);
        let (c, mut rc) = conn(3);
        lobby.join(a, JoinRequest::New { abandon: None }).unwrap();
        lobby.join(b, JoinRequest::New { abandon: None }).unwrap();
        assert_eq!(
            lobby.join(c, JoinRequest::New { abandon: None }),
            Err(Rejection::SessionFull)
        );
        assert_eq!(drain(&mut rc), vec![Message::Rejected(Rejection::SessionFull)]);
    }

    #[test]
    fn disconnect_before_token_frees_the_seat() {
        let mut lobby = Lobby::new(one_skiff(), None);
        let (a, _ra) = conn(1);
        let (b, _rb) = conn(2);
        lobby.join(a, JoinRequest::New { abandon: None }).unwrap();
        lobby.join(b, JoinRequest::New { abandon: None }).unwrap();
        lobby.handle(
            ConnectionId(1),
            Message::PlaceShip {
                coord: Coord::new(0, 0),
                orientation: Orientation::Horizontal,
            },
        );
        lobby.disconnect(ConnectionId(1));
        assert_eq!(lobby.game().phase(), GamePhase::WaitingForPlayers);
        assert!(!lobby.registry().contains(UserId(1)));
        assert!(lobby.take_dirty());
    }

    #[test]
    fn seat_is_forfeited_once_the_grace_runs_out() {
        let mut lobby = Lobby::new(one_skiff(), Some(Duration::from_secs(30)));
        let (a, _ra) = conn(1);
        let (b, _rb) = conn(2);
        lobby.join(a, JoinRequest::New { abandon: None }).unwrap();
        lobby.join(b, JoinRequest::New { abandon: None }).unwrap();
        for (id, row) in [(1, 0), (2, 9)] {
            lobby.handle(
                ConnectionId(id),
                Message::PlaceShip {
                    coord: Coord::new(row, 0),
                    orientation: Orientation::Horizontal,
                },
            );
            lobby.handle(ConnectionId(id), Message::Finalize);
        }
        assert_eq!(lobby.game().phase(), GamePhase::InProgress);

        lobby.disconnect(ConnectionId(1));
        lobby.expire(Instant::now());
        assert_eq!(lobby.game().phase(), GamePhase::InProgress);

        lobby.expire(Instant::now() + Duration::from_secs(31));
        assert_eq!(lobby.game().winner(), Some(UserId(2)));
    }
}
