//! Client side of the protocol: an explicit state machine plus a thin client
//! over any [`Transport`], and a bot that plays on its own.

use std::collections::VecDeque;

use rand::Rng;

use crate::board::Board;
use crate::common::{Coord, Orientation, ShotOutcome};
use crate::config::{Fleet, Grid, BOARD_SIZE};
use crate::game::{GameEvent, GamePhase, PlacementAck, Seat, SessionView, VersionedEvent};
use crate::protocol::{JoinRequest, Message, Rejection, Welcome, PROTOCOL_VERSION};
use crate::session::{Credentials, UserId};
use crate::ship::Ship;
use crate::transport::Transport;

/// Where a client stands, derived from everything the server has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Connected, no role yet (or the last join was refused).
    AwaitingRole,
    /// Seated, waiting for an opponent.
    Queued,
    Placing,
    /// Own placement finalized, opponent still placing.
    AwaitingOpponent,
    MyTurn,
    OpponentTurn,
    Spectating,
    GameOver,
    RematchPending,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player { user: UserId, seat: Seat },
    Spectator,
}

/// Client-side view of the session, fed with every message received.
#[derive(Debug, Clone)]
pub struct ClientSession {
    state: ClientState,
    role: Option<Role>,
    credentials: Option<Credentials>,
    phase: Option<GamePhase>,
    turn: Option<UserId>,
    winner: Option<UserId>,
    ready: bool,
    last_version: u64,
    view: Option<SessionView>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            state: ClientState::AwaitingRole,
            role: None,
            credentials: None,
            phase: None,
            turn: None,
            winner: None,
            ready: false,
            last_version: 0,
            view: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn user(&self) -> Option<UserId> {
        match self.role {
            Some(Role::Player { user, .. }) => Some(user),
            _ => None,
        }
    }

    /// Credentials for reconnecting, once the server has issued them.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
    }

    pub fn winner(&self) -> Option<UserId> {
        self.winner
    }

    pub fn last_version(&self) -> u64 {
        self.last_version
    }

    /// The last snapshot received.
    pub fn view(&self) -> Option<&SessionView> {
        self.view.as_ref()
    }

    pub fn close(&mut self) {
        self.state = ClientState::Closed;
    }

    /// Fold one server message into the session and return the new state.
    pub fn apply(&mut self, msg: &Message) -> ClientState {
        if self.state == ClientState::Closed {
            return self.state;
        }
        match msg {
            Message::Welcome(Welcome::Player { user, seat })
            | Message::Welcome(Welcome::Reconnected { user, seat }) => {
                self.role = Some(Role::Player {
                    user: *user,
                    seat: *seat,
                });
            }
            Message::Welcome(Welcome::Spectator { .. }) => self.role = Some(Role::Spectator),
            Message::Snapshot(view) => {
                self.enter_phase(view.phase);
                self.turn = view.turn;
                self.winner = view.winner;
                self.last_version = self.last_version.max(view.version);
                if let Some(user) = self.user() {
                    self.ready = view
                        .seats
                        .iter()
                        .flatten()
                        .any(|s| s.user == user && s.ready);
                }
                self.view = Some(view.clone());
            }
            Message::TokenIssued(credentials) => {
                self.credentials = Some(*credentials);
                self.ready = true;
            }
            Message::Event(event) => self.apply_event(event),
            Message::ServerClosing => {
                self.state = ClientState::Closed;
                return self.state;
            }
            _ => {}
        }
        self.state = self.derive_state();
        self.state
    }

    fn enter_phase(&mut self, phase: GamePhase) {
        let finished = |p: Option<GamePhase>| {
            matches!(p, Some(GamePhase::GameOver) | Some(GamePhase::AwaitingRematch))
        };
        if finished(self.phase) && !finished(Some(phase)) {
            // A new game: boards were cleared and tokens revoked.
            self.ready = false;
            self.credentials = None;
            self.winner = None;
            self.turn = None;
        }
        self.phase = Some(phase);
    }

    fn apply_event(&mut self, event: &VersionedEvent) {
        // Already covered by a snapshot.
        if event.version <= self.last_version {
            return;
        }
        self.last_version = event.version;
        let me = self.user();
        match &event.event {
            GameEvent::PhaseChanged(phase) => self.enter_phase(*phase),
            GameEvent::PlayerReady { user } if Some(*user) == me => self.ready = true,
            GameEvent::TurnNotice { user } => self.turn = Some(*user),
            GameEvent::GameOver { winner } => {
                self.winner = Some(*winner);
                self.phase = Some(GamePhase::GameOver);
            }
            GameEvent::RematchPrompt => self.phase = Some(GamePhase::AwaitingRematch),
            GameEvent::PlayerLeft { user } if Some(*user) == me => {
                self.role = None;
                self.credentials = None;
            }
            _ => {}
        }
    }

    fn derive_state(&self) -> ClientState {
        let user = match self.role {
            None => return ClientState::AwaitingRole,
            Some(Role::Spectator) => return ClientState::Spectating,
            Some(Role::Player { user, .. }) => user,
        };
        match self.phase {
            None | Some(GamePhase::WaitingForPlayers) => ClientState::Queued,
            Some(GamePhase::PlacingShips) if self.ready => ClientState::AwaitingOpponent,
            Some(GamePhase::PlacingShips) => ClientState::Placing,
            // Between the phase change and the first TurnNotice.
            Some(GamePhase::InProgress) if self.turn.is_none() => ClientState::AwaitingOpponent,
            Some(GamePhase::InProgress) if self.turn == Some(user) => ClientState::MyTurn,
            Some(GamePhase::InProgress) => ClientState::OpponentTurn,
            Some(GamePhase::GameOver) => ClientState::GameOver,
            Some(GamePhase::AwaitingRematch) => ClientState::RematchPending,
        }
    }
}

/// A connected client. Messages that arrive while waiting for a reply are
/// kept and handed out by [`Client::next_message`] in arrival order.
pub struct Client<T: Transport> {
    transport: T,
    session: ClientSession,
    backlog: VecDeque<Message>,
}

impl<T: Transport> Client<T> {
    /// Perform the protocol handshake over `transport`.
    pub async fn connect(mut transport: T) -> anyhow::Result<Self> {
        transport
            .send(Message::Handshake {
                version: PROTOCOL_VERSION,
            })
            .await?;
        match transport.recv().await? {
            Message::HandshakeAck { version } if version == PROTOCOL_VERSION => {}
            Message::HandshakeAck { version } => {
                return Err(anyhow::anyhow!(
                    "Protocol version mismatch in HandshakeAck: expected {}, got {}",
                    PROTOCOL_VERSION,
                    version
                ))
            }
            other => {
                return Err(anyhow::anyhow!(
                    "Expected HandshakeAck, got {} (closing session)",
                    other.kind()
                ))
            }
        }
        Ok(Self {
            transport,
            session: ClientSession::new(),
            backlog: VecDeque::new(),
        })
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn state(&self) -> ClientState {
        self.session.state()
    }

    async fn recv_raw(&mut self) -> anyhow::Result<Message> {
        match self.transport.recv().await {
            Ok(msg) => {
                self.session.apply(&msg);
                Ok(msg)
            }
            Err(e) => {
                self.session.close();
                Err(e)
            }
        }
    }

    /// Wait until `pick` accepts a message. A `Rejected` reply fails with
    /// the [`Rejection`] as error; anything else goes to the backlog.
    async fn await_reply<R>(
        &mut self,
        mut pick: impl FnMut(&Message) -> Option<R> + Send,
    ) -> anyhow::Result<R> {
        loop {
            let msg = self.recv_raw().await?;
            match msg {
                Message::Rejected(rejection) => return Err(rejection.into()),
                Message::ServerClosing => return Err(anyhow::anyhow!("server is shutting down")),
                _ => {}
            }
            if let Some(out) = pick(&msg) {
                return Ok(out);
            }
            self.backlog.push_back(msg);
        }
    }

    /// Next message from the server, backlog first.
    pub async fn next_message(&mut self) -> anyhow::Result<Message> {
        match self.backlog.pop_front() {
            Some(msg) => Ok(msg),
            None => self.recv_raw().await,
        }
    }

    /// Next game event, skipping everything else.
    pub async fn next_event(&mut self) -> anyhow::Result<VersionedEvent> {
        loop {
            if let Message::Event(event) = self.next_message().await? {
                return Ok(event);
            }
        }
    }

    /// Read messages until the state satisfies `done`.
    pub async fn wait_for(&mut self, done: impl Fn(ClientState) -> bool) -> anyhow::Result<ClientState> {
        self.backlog.clear();
        while !done(self.state()) {
            self.recv_raw().await?;
        }
        Ok(self.state())
    }

    pub async fn join(&mut self, request: JoinRequest) -> anyhow::Result<Welcome> {
        self.transport.send(Message::Join(request)).await?;
        self.await_reply(|msg| match msg {
            Message::Welcome(welcome) => Some(*welcome),
            _ => None,
        })
        .await
    }

    pub async fn place_ship(
        &mut self,
        coord: Coord,
        orientation: Orientation,
    ) -> anyhow::Result<PlacementAck> {
        self.transport
            .send(Message::PlaceShip { coord, orientation })
            .await?;
        self.await_reply(|msg| match msg {
            Message::PlacementAck(ack) => Some(ack.clone()),
            _ => None,
        })
        .await
    }

    /// Lock placement and return the reconnection credentials.
    pub async fn finalize(&mut self) -> anyhow::Result<Credentials> {
        self.transport.send(Message::Finalize).await?;
        self.await_reply(|msg| match msg {
            Message::TokenIssued(credentials) => Some(*credentials),
            _ => None,
        })
        .await
    }

    /// Fire at `coord`. Returns once the turn has passed on (or the game
    /// ended), so [`Client::state`] is current afterwards.
    pub async fn fire(&mut self, coord: Coord) -> anyhow::Result<ShotOutcome> {
        let me = self.session.user();
        self.transport.send(Message::Fire { coord }).await?;
        let outcome = self
            .await_reply(move |msg| match msg {
                Message::Event(VersionedEvent {
                    event:
                        GameEvent::ShotResult {
                            shooter, outcome, ..
                        },
                    ..
                }) if Some(*shooter) == me => Some(outcome.clone()),
                _ => None,
            })
            .await?;
        self.await_reply(|msg| match msg {
            Message::Event(VersionedEvent {
                event: GameEvent::TurnNotice { .. } | GameEvent::GameOver { .. },
                ..
            }) => Some(()),
            _ => None,
        })
        .await?;
        Ok(outcome)
    }

    pub async fn vote_rematch(&mut self, accept: bool) -> anyhow::Result<()> {
        self.transport.send(Message::RematchVote { accept }).await
    }

    pub async fn leave(&mut self) -> anyhow::Result<()> {
        self.transport.send(Message::Leave).await
    }

    /// Send a raw message, bypassing the helpers above.
    pub async fn send(&mut self, msg: Message) -> anyhow::Result<()> {
        self.transport.send(msg).await
    }

    /// Place every remaining ship at random positions.
    pub async fn auto_place<R: Rng + Send>(&mut self, rng: &mut R) -> anyhow::Result<()> {
        let me = self
            .session
            .user()
            .ok_or_else(|| anyhow::anyhow!("not seated"))?;
        let unplaced = self
            .session
            .view()
            .and_then(|v| v.seats.iter().flatten().find(|s| s.user == me))
            .map(|s| s.unplaced.clone())
            .unwrap_or_default();
        if unplaced.is_empty() {
            return Ok(());
        }
        let mut local = Board::new(Fleet::new(unplaced.clone())?);
        for kind in unplaced {
            let (bow, orientation) = local
                .random_placement(rng, &kind)
                .ok_or_else(|| anyhow::anyhow!("no room left for {}", kind))?;
            self.place_ship(bow, orientation).await?;
            local.place_ship(Ship::new(kind, bow, orientation)?)?;
        }
        Ok(())
    }
}

/// How a bot session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BotSummary {
    pub games: u32,
    pub wins: u32,
}

/// Plays automatically: random placement and random untried shots.
pub struct Bot<R: Rng + Send> {
    rng: R,
    accept_rematch: bool,
    max_games: Option<u32>,
}

impl<R: Rng + Send> Bot<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            accept_rematch: true,
            max_games: None,
        }
    }

    /// Stop (and leave) after `games` finished games.
    pub fn with_max_games(mut self, games: u32) -> Self {
        self.max_games = Some(games);
        self
    }

    pub fn with_rematch(mut self, accept: bool) -> Self {
        self.accept_rematch = accept;
        self
    }

    fn pick_target(&mut self, tried: &Grid) -> Option<Coord> {
        let open: Vec<Coord> = (0..BOARD_SIZE)
            .flat_map(|r| (0..BOARD_SIZE).map(move |c| Coord::new(r, c)))
            .filter(|c| !tried.get(c.row as usize, c.col as usize).unwrap_or(true))
            .collect();
        if open.is_empty() {
            return None;
        }
        Some(open[self.rng.random_range(0..open.len())])
    }

    /// Drive `client` until the connection closes or the game limit is hit.
    pub async fn run<T: Transport>(&mut self, client: &mut Client<T>) -> anyhow::Result<BotSummary> {
        let mut summary = BotSummary::default();
        let mut tried = Grid::new();
        let mut voted = false;
        let mut counted = false;
        loop {
            match client.state() {
                ClientState::Closed => return Ok(summary),
                ClientState::Placing => {
                    tried.clear_all();
                    voted = false;
                    counted = false;
                    client.auto_place(&mut self.rng).await?;
                    client.finalize().await?;
                    continue;
                }
                ClientState::MyTurn => {
                    let target = self
                        .pick_target(&tried)
                        .ok_or_else(|| anyhow::anyhow!("no untried cells left"))?;
                    match client.fire(target).await {
                        Ok(outcome) => {
                            tried.set(target.row as usize, target.col as usize)?;
                            log::debug!("bot fired at {}: {}", target, outcome)
                        }
                        Err(e) if e.downcast_ref::<Rejection>().is_some() => {
                            log::debug!("bot shot at {} refused: {}", target, e)
                        }
                        Err(e) => return Err(e),
                    }
                    continue;
                }
                ClientState::GameOver | ClientState::RematchPending if !counted => {
                    counted = true;
                    summary.games += 1;
                    if client.session().winner().is_some() && client.session().winner() == client.session().user() {
                        summary.wins += 1;
                    }
                    if self.max_games.is_some_and(|max| summary.games >= max) {
                        client.leave().await?;
                        return Ok(summary);
                    }
                    continue;
                }
                ClientState::RematchPending if !voted => {
                    voted = true;
                    client.vote_rematch(self.accept_rematch).await?;
                }
                _ => {}
            }
            if let Err(e) = client.next_message().await {
                log::debug!("bot connection ended: {}", e);
                return Ok(summary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(version: u64, event: GameEvent) -> Message {
        Message::Event(VersionedEvent { version, event })
    }

    #[test]
    fn player_walks_through_a_game() {
        let mut s = ClientSession::new();
        assert_eq!(s.state(), ClientState::AwaitingRole);
        let me = UserId(1);
        s.apply(&Message::Welcome(Welcome::Player {
            user: me,
            seat: Seat::One,
        }));
        assert_eq!(s.state(), ClientState::Queued);
        s.apply(&event(2, GameEvent::PhaseChanged(GamePhase::PlacingShips)));
        assert_eq!(s.state(), ClientState::Placing);
        s.apply(&Message::TokenIssued(Credentials {
            user: me,
            token: crate::session::SessionToken::from_bytes([1; 8]),
        }));
        assert_eq!(s.state(), ClientState::AwaitingOpponent);
        s.apply(&event(5, GameEvent::PhaseChanged(GamePhase::InProgress)));
        assert_eq!(s.state(), ClientState::AwaitingOpponent);
        s.apply(&event(6, GameEvent::TurnNotice { user: me }));
        assert_eq!(s.state(), ClientState::MyTurn);
        s.apply(&event(8, GameEvent::TurnNotice { user: UserId(2) }));
        assert_eq!(s.state(), ClientState::OpponentTurn);
        s.apply(&event(9, GameEvent::TurnSkipped { user: UserId(2) }));
        s.apply(&event(10, GameEvent::TurnNotice { user: me }));
        assert_eq!(s.state(), ClientState::MyTurn);
        s.apply(&event(11, GameEvent::PhaseChanged(GamePhase::GameOver)));
        s.apply(&event(12, GameEvent::GameOver { winner: UserId(2) }));
        assert_eq!(s.state(), ClientState::GameOver);
        s.apply(&event(13, GameEvent::PhaseChanged(GamePhase::AwaitingRematch)));
        s.apply(&event(14, GameEvent::RematchPrompt));
        assert_eq!(s.state(), ClientState::RematchPending);
        s.apply(&event(15, GameEvent::PhaseChanged(GamePhase::PlacingShips)));
        assert_eq!(s.state(), ClientState::Placing);
        assert_eq!(s.credentials(), None);
        assert_eq!(s.last_version(), 15);
        assert_eq!(s.apply(&Message::ServerClosing), ClientState::Closed);
    }

    #[test]
    fn refused_join_keeps_waiting_for_a_role() {
        let mut s = ClientSession::new();
        s.apply(&Message::Rejected(Rejection::SessionFull));
        assert_eq!(s.state(), ClientState::AwaitingRole);
        s.apply(&Message::Welcome(Welcome::Spectator {
            id: crate::session::ConnectionId(3),
        }));
        assert_eq!(s.state(), ClientState::Spectating);
        s.close();
        assert_eq!(s.apply(&event(1, GameEvent::RematchPrompt)), ClientState::Closed);
    }
}
