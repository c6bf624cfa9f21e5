//! Turn-based game state machine shared by the two seated players.
//!
//! `GameSession` owns both boards and is the single source of truth for the
//! phase, the turn and the winner. Every mutation that other parties should
//! learn about is queued as a [`VersionedEvent`]; the owner drains the queue
//! with [`GameSession::take_events`] after each operation and fans it out.

use core::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::board::{Board, CellState};
use crate::common::{BoardError, Coord, Orientation, ShotOutcome};
use crate::config::GameConfig;
use crate::session::UserId;
use crate::ship::{Ship, ShipType};

/// One of the two player positions at the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    One,
    Two,
}

impl Seat {
    pub const ALL: [Seat; 2] = [Seat::One, Seat::Two];

    pub fn index(self) -> usize {
        match self {
            Seat::One => 0,
            Seat::Two => 1,
        }
    }

    pub fn other(self) -> Seat {
        match self {
            Seat::One => Seat::Two,
            Seat::Two => Seat::One,
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seat::One => write!(f, "seat 1"),
            Seat::Two => write!(f, "seat 2"),
        }
    }
}

/// Connection state of a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatStatus {
    Empty,
    Connected,
    Disconnected { since: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    WaitingForPlayers,
    PlacingShips,
    InProgress,
    GameOver,
    AwaitingRematch,
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GamePhase::WaitingForPlayers => "waiting for players",
            GamePhase::PlacingShips => "placing ships",
            GamePhase::InProgress => "in progress",
            GamePhase::GameOver => "game over",
            GamePhase::AwaitingRematch => "awaiting rematch",
        };
        f.write_str(name)
    }
}

/// State changes observable by players and spectators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    PhaseChanged(GamePhase),
    PlayerJoined { user: UserId, seat: Seat },
    /// The player finalized ship placement.
    PlayerReady { user: UserId },
    TurnNotice { user: UserId },
    /// The player let their turn run out and lost it.
    TurnSkipped { user: UserId },
    ShotResult {
        shooter: UserId,
        coord: Coord,
        outcome: ShotOutcome,
    },
    GameOver { winner: UserId },
    RematchPrompt,
    PlayerDisconnected { user: UserId },
    PlayerReconnected { user: UserId },
    PlayerLeft { user: UserId },
}

/// An event stamped with the session version it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedEvent {
    pub version: u64,
    pub event: GameEvent,
}

/// Reply to a successful ship placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementAck {
    pub ship: String,
    pub cells: Vec<Coord>,
    /// Fleet entries still to place, in placement order.
    pub remaining: Vec<ShipType>,
}

/// How a rematch poll was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RematchOutcome {
    /// Both players accepted; boards were reset and placement restarts.
    Restarted,
    /// At least one seat is free again. `vacated` lists the players who
    /// declined and lost their seat.
    Reopened { vacated: Vec<UserId> },
}

/// Consequence of a player letting the turn clock run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTimeout {
    /// First strike: the turn passed to the opponent.
    Skipped { user: UserId },
    /// Last strike: the opponent wins.
    Forfeited { user: UserId, winner: UserId },
}

/// Timed-out turns a player may collect in one game; the last one forfeits.
pub const MAX_TURN_STRIKES: u8 = 2;

/// Errors returned by game actions. None of them changes the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("action not allowed while {0}")]
    InvalidState(GamePhase),
    #[error("that cell has already been shot")]
    AlreadyShot,
    #[error("player is not seated in this game")]
    NotSeated,
    #[error("both seats are taken")]
    SessionFull,
    #[error("every ship is already placed")]
    FleetComplete,
    #[error(transparent)]
    Board(#[from] BoardError),
}

#[derive(Debug, Clone)]
struct SeatedPlayer {
    user: UserId,
    board: Board,
    status: SeatStatus,
}

/// The persisted form of a seat: identity and board only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub user: UserId,
    pub board: Board,
}

/// Serializable copy of the whole game state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub config: GameConfig,
    pub phase: GamePhase,
    pub seats: [Option<SeatSnapshot>; 2],
    pub turn: Option<UserId>,
    pub winner: Option<UserId>,
    pub version: u64,
    pub rematch_votes: [Option<bool>; 2],
    /// Timed-out turns per seat in the current game.
    pub strikes: [u8; 2],
}

/// Whose eyes a [`SessionView`] is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Player(UserId),
    Spectator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    pub seat: Seat,
    pub user: UserId,
    pub connected: bool,
    pub ready: bool,
    pub ships_afloat: usize,
    /// Ships still to place, only filled in where the grid is revealed.
    pub unplaced: Vec<ShipType>,
    pub grid: Vec<Vec<CellState>>,
}

/// Read-only picture of the session sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: GamePhase,
    pub version: u64,
    pub turn: Option<UserId>,
    pub winner: Option<UserId>,
    pub seats: [Option<SeatView>; 2],
}

pub struct GameSession {
    config: GameConfig,
    phase: GamePhase,
    seats: [Option<SeatedPlayer>; 2],
    turn: Option<UserId>,
    winner: Option<UserId>,
    version: u64,
    rematch_votes: [Option<bool>; 2],
    strikes: [u8; 2],
    /// When the player to move got the turn.
    turn_started: Instant,
    rematch_opened: Instant,
    pending: Vec<VersionedEvent>,
}

impl GameSession {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            phase: GamePhase::WaitingForPlayers,
            seats: [None, None],
            turn: None,
            winner: None,
            version: 0,
            rematch_votes: [None, None],
            strikes: [0, 0],
            turn_started: Instant::now(),
            rematch_opened: Instant::now(),
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn turn(&self) -> Option<UserId> {
        self.turn
    }

    pub fn winner(&self) -> Option<UserId> {
        self.winner
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn seat_of(&self, user: UserId) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|s| self.seats[s.index()].as_ref().map(|p| p.user) == Some(user))
    }

    pub fn user_at(&self, seat: Seat) -> Option<UserId> {
        self.seats[seat.index()].as_ref().map(|p| p.user)
    }

    pub fn seat_status(&self, seat: Seat) -> SeatStatus {
        self.seats[seat.index()]
            .as_ref()
            .map_or(SeatStatus::Empty, |p| p.status)
    }

    pub fn board(&self, seat: Seat) -> Option<&Board> {
        self.seats[seat.index()].as_ref().map(|p| &p.board)
    }

    /// Users currently holding a seat.
    pub fn players(&self) -> impl Iterator<Item = UserId> + '_ {
        self.seats.iter().flatten().map(|p| p.user)
    }

    /// Timed-out turns `seat` has collected this game.
    pub fn strikes(&self, seat: Seat) -> u8 {
        self.strikes[seat.index()]
    }

    pub fn has_free_seat(&self) -> bool {
        self.seats.iter().any(Option::is_none)
    }

    /// Events produced since the last call, in emission order.
    pub fn take_events(&mut self) -> Vec<VersionedEvent> {
        std::mem::take(&mut self.pending)
    }

    fn emit(&mut self, event: GameEvent) {
        self.version += 1;
        log::debug!("v{} {:?}", self.version, event);
        self.pending.push(VersionedEvent {
            version: self.version,
            event,
        });
    }

    fn set_phase(&mut self, phase: GamePhase) {
        if self.phase != phase {
            log::info!("game phase {} -> {}", self.phase, phase);
            self.phase = phase;
            self.emit(GameEvent::PhaseChanged(phase));
        }
    }

    fn seated(&self, user: UserId) -> Result<Seat, GameError> {
        self.seat_of(user).ok_or(GameError::NotSeated)
    }

    fn player_mut(&mut self, seat: Seat) -> Result<&mut SeatedPlayer, GameError> {
        self.seats[seat.index()].as_mut().ok_or(GameError::NotSeated)
    }

    /// Seat `user` at the first free position.
    ///
    /// Seats only open while waiting for players. Filling the second seat
    /// moves the game to ship placement.
    pub fn claim_seat(&mut self, user: UserId) -> Result<Seat, GameError> {
        if self.phase != GamePhase::WaitingForPlayers {
            return Err(if self.has_free_seat() {
                GameError::InvalidState(self.phase)
            } else {
                GameError::SessionFull
            });
        }
        if self.seat_of(user).is_some() {
            return Err(GameError::InvalidState(self.phase));
        }
        let seat = Seat::ALL
            .into_iter()
            .find(|s| self.seats[s.index()].is_none())
            .ok_or(GameError::SessionFull)?;
        self.seats[seat.index()] = Some(SeatedPlayer {
            user,
            board: Board::new(self.config.fleet(seat).clone()),
            status: SeatStatus::Connected,
        });
        self.emit(GameEvent::PlayerJoined { user, seat });
        if !self.has_free_seat() {
            self.set_phase(GamePhase::PlacingShips);
        }
        Ok(seat)
    }

    /// Place the next unplaced ship of `user`'s fleet with its bow at `bow`.
    pub fn place_ship(
        &mut self,
        user: UserId,
        bow: Coord,
        orientation: Orientation,
    ) -> Result<PlacementAck, GameError> {
        if self.phase != GamePhase::PlacingShips {
            return Err(GameError::InvalidState(self.phase));
        }
        let seat = self.seated(user)?;
        let board = &mut self.player_mut(seat)?.board;
        if board.is_finalized() {
            return Err(BoardError::PlacementLocked.into());
        }
        let kind = board.next_unplaced().ok_or(GameError::FleetComplete)?;
        let ship = Ship::new(kind, bow, orientation)?;
        let cells = ship.cells().to_vec();
        let name = ship.name().to_string();
        board.place_ship(ship)?;
        log::debug!("{} placed {} at {}", user, name, bow);
        Ok(PlacementAck {
            ship: name,
            cells,
            remaining: board.remaining(),
        })
    }

    /// Lock `user`'s ship placement. Once both boards are locked the game
    /// starts and the lowest user id moves first.
    pub fn finalize(&mut self, user: UserId) -> Result<(), GameError> {
        if self.phase != GamePhase::PlacingShips {
            return Err(GameError::InvalidState(self.phase));
        }
        let seat = self.seated(user)?;
        let board = &mut self.player_mut(seat)?.board;
        if board.is_finalized() {
            return Err(BoardError::PlacementLocked.into());
        }
        board.finalize_placement()?;
        self.emit(GameEvent::PlayerReady { user });

        let all_ready = self
            .seats
            .iter()
            .all(|s| s.as_ref().is_some_and(|p| p.board.is_finalized()));
        if all_ready {
            let first = self.players().min();
            self.turn = first;
            self.turn_started = Instant::now();
            self.strikes = [0, 0];
            self.set_phase(GamePhase::InProgress);
            if let Some(user) = first {
                self.emit(GameEvent::TurnNotice { user });
            }
        }
        Ok(())
    }

    /// Fire at `coord` on the opponent's board.
    ///
    /// The turn passes to the opponent after every resolved shot, whatever
    /// the outcome. Sinking the last ship ends the game with `user` as winner.
    pub fn fire_at(&mut self, user: UserId, coord: Coord) -> Result<ShotOutcome, GameError> {
        if self.phase != GamePhase::InProgress {
            return Err(GameError::InvalidState(self.phase));
        }
        if self.turn != Some(user) {
            return Err(GameError::NotYourTurn);
        }
        let target_seat = self.seated(user)?.other();
        let target = self.player_mut(target_seat)?;
        let opponent = target.user;
        let outcome = target.board.receive_shot(coord)?;
        if outcome == ShotOutcome::AlreadyShot {
            return Err(GameError::AlreadyShot);
        }
        let defeated = target.board.is_defeated();

        self.turn = Some(opponent);
        self.turn_started = Instant::now();
        self.emit(GameEvent::ShotResult {
            shooter: user,
            coord,
            outcome: outcome.clone(),
        });
        if defeated {
            self.winner = Some(user);
            self.set_phase(GamePhase::GameOver);
            self.emit(GameEvent::GameOver { winner: user });
            log::info!("{} won the game", user);
        } else {
            self.emit(GameEvent::TurnNotice { user: opponent });
        }
        Ok(outcome)
    }

    pub fn mark_disconnected(&mut self, user: UserId) -> Result<(), GameError> {
        self.mark_disconnected_at(user, Instant::now())
    }

    pub fn mark_disconnected_at(&mut self, user: UserId, since: Instant) -> Result<(), GameError> {
        let seat = self.seated(user)?;
        let player = self.player_mut(seat)?;
        if matches!(player.status, SeatStatus::Disconnected { .. }) {
            return Ok(());
        }
        player.status = SeatStatus::Disconnected { since };
        self.emit(GameEvent::PlayerDisconnected { user });
        Ok(())
    }

    /// Reattach a disconnected player. Board, turn and phase are untouched.
    pub fn mark_connected(&mut self, user: UserId) -> Result<(), GameError> {
        let seat = self.seated(user)?;
        let player = self.player_mut(seat)?;
        if player.status == SeatStatus::Connected {
            return Ok(());
        }
        player.status = SeatStatus::Connected;
        if self.turn == Some(user) {
            // The clock does not run while the player to move is away.
            self.turn_started = Instant::now();
        }
        self.emit(GameEvent::PlayerReconnected { user });
        Ok(())
    }

    /// Charge the player to move with a strike once `limit` has passed since
    /// their turn began.
    ///
    /// A first strike skips the turn; the strike that reaches
    /// [`MAX_TURN_STRIKES`] ends the game in the opponent's favour. A
    /// disconnected player is left to the reconnection grace instead.
    pub fn expire_turn(&mut self, now: Instant, limit: Duration) -> Option<TurnTimeout> {
        if self.phase != GamePhase::InProgress {
            return None;
        }
        let user = self.turn?;
        let seat = self.seat_of(user)?;
        if self.seat_status(seat) != SeatStatus::Connected
            || now.saturating_duration_since(self.turn_started) < limit
        {
            return None;
        }
        let opponent = self.user_at(seat.other())?;
        let strikes = &mut self.strikes[seat.index()];
        *strikes = strikes.saturating_add(1);
        if *strikes >= MAX_TURN_STRIKES {
            self.winner = Some(opponent);
            self.turn = None;
            self.set_phase(GamePhase::GameOver);
            self.emit(GameEvent::GameOver { winner: opponent });
            log::info!("{} timed out again and forfeits; {} wins", user, opponent);
            return Some(TurnTimeout::Forfeited {
                user,
                winner: opponent,
            });
        }
        log::info!("{} took too long; turn passes to {}", user, opponent);
        self.turn = Some(opponent);
        self.turn_started = now;
        self.emit(GameEvent::TurnSkipped { user });
        self.emit(GameEvent::TurnNotice { user: opponent });
        Some(TurnTimeout::Skipped { user })
    }

    /// Players whose disconnection has lasted at least `grace`.
    pub fn expired_players(&self, now: Instant, grace: Duration) -> Vec<UserId> {
        self.seats
            .iter()
            .flatten()
            .filter(|p| match p.status {
                SeatStatus::Disconnected { since } => now.saturating_duration_since(since) >= grace,
                _ => false,
            })
            .map(|p| p.user)
            .collect()
    }

    /// Remove `user` from the table outside of a running game.
    ///
    /// During placement the opponent keeps their board and the game waits for
    /// a new player. After a finished game the remaining board is cleared.
    pub fn vacate(&mut self, user: UserId) -> Result<(), GameError> {
        if self.phase == GamePhase::InProgress {
            return Err(GameError::InvalidState(self.phase));
        }
        if self.phase == GamePhase::AwaitingRematch {
            self.vote_rematch(user, false)?;
            return Ok(());
        }
        let seat = self.seated(user)?;
        self.seats[seat.index()] = None;
        self.emit(GameEvent::PlayerLeft { user });
        if self.phase == GamePhase::GameOver {
            self.clear_for_new_game();
        }
        self.set_phase(GamePhase::WaitingForPlayers);
        Ok(())
    }

    /// `user` abandons a running game; the opponent wins.
    pub fn forfeit(&mut self, user: UserId) -> Result<UserId, GameError> {
        if self.phase != GamePhase::InProgress {
            return Err(GameError::InvalidState(self.phase));
        }
        let seat = self.seated(user)?;
        let winner = self.user_at(seat.other()).ok_or(GameError::NotSeated)?;
        self.seats[seat.index()] = None;
        self.emit(GameEvent::PlayerLeft { user });
        self.winner = Some(winner);
        self.turn = None;
        self.set_phase(GamePhase::GameOver);
        self.emit(GameEvent::GameOver { winner });
        log::info!("{} forfeited, {} wins", user, winner);
        Ok(winner)
    }

    /// Poll the seated players (and volunteering spectators) for a rematch.
    ///
    /// Returns an outcome straight away when nobody is left to ask.
    pub fn open_rematch(&mut self) -> Result<Option<RematchOutcome>, GameError> {
        if self.phase != GamePhase::GameOver {
            return Err(GameError::InvalidState(self.phase));
        }
        self.rematch_votes = [None, None];
        self.rematch_opened = Instant::now();
        self.set_phase(GamePhase::AwaitingRematch);
        self.emit(GameEvent::RematchPrompt);
        Ok(self.settle_rematch())
    }

    /// Record `user`'s rematch vote and settle the poll once every seated
    /// player has answered.
    pub fn vote_rematch(
        &mut self,
        user: UserId,
        accept: bool,
    ) -> Result<Option<RematchOutcome>, GameError> {
        if self.phase != GamePhase::AwaitingRematch {
            return Err(GameError::InvalidState(self.phase));
        }
        let seat = self.seated(user)?;
        self.rematch_votes[seat.index()] = Some(accept);
        Ok(self.settle_rematch())
    }

    /// Count every seated player who has not answered the rematch poll
    /// within `limit` as declining, and settle the poll.
    pub fn expire_rematch(&mut self, now: Instant, limit: Duration) -> Option<RematchOutcome> {
        if self.phase != GamePhase::AwaitingRematch
            || now.saturating_duration_since(self.rematch_opened) < limit
        {
            return None;
        }
        for seat in Seat::ALL {
            if self.seats[seat.index()].is_some() && self.rematch_votes[seat.index()].is_none() {
                log::info!("{} did not answer the rematch poll in time", seat);
                self.rematch_votes[seat.index()] = Some(false);
            }
        }
        self.settle_rematch()
    }

    fn settle_rematch(&mut self) -> Option<RematchOutcome> {
        let pending = Seat::ALL.into_iter().any(|s| {
            self.seats[s.index()].is_some() && self.rematch_votes[s.index()].is_none()
        });
        if pending {
            return None;
        }
        let everyone_accepted = Seat::ALL.into_iter().all(|s| {
            self.seats[s.index()].is_some() && self.rematch_votes[s.index()] == Some(true)
        });
        if everyone_accepted {
            self.clear_for_new_game();
            self.set_phase(GamePhase::PlacingShips);
            return Some(RematchOutcome::Restarted);
        }

        let mut vacated = Vec::new();
        for seat in Seat::ALL {
            if self.rematch_votes[seat.index()] == Some(false) {
                if let Some(player) = self.seats[seat.index()].take() {
                    vacated.push(player.user);
                    self.emit(GameEvent::PlayerLeft { user: player.user });
                }
            }
        }
        self.clear_for_new_game();
        self.set_phase(GamePhase::WaitingForPlayers);
        Some(RematchOutcome::Reopened { vacated })
    }

    fn clear_for_new_game(&mut self) {
        for player in self.seats.iter_mut().flatten() {
            player.board.reset();
        }
        self.turn = None;
        self.winner = None;
        self.rematch_votes = [None, None];
        self.strikes = [0, 0];
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            config: self.config.clone(),
            phase: self.phase,
            seats: [0, 1].map(|i| {
                self.seats[i].as_ref().map(|p| SeatSnapshot {
                    user: p.user,
                    board: p.board.clone(),
                })
            }),
            turn: self.turn,
            winner: self.winner,
            version: self.version,
            rematch_votes: self.rematch_votes,
            strikes: self.strikes,
        }
    }

    /// Rebuild a session from a snapshot. Every seated player starts out
    /// disconnected and must reconnect.
    pub fn restore(snapshot: GameSnapshot) -> Self {
        let now = Instant::now();
        let seats = snapshot.seats.map(|s| {
            s.map(|s| SeatedPlayer {
                user: s.user,
                board: s.board,
                status: SeatStatus::Disconnected { since: now },
            })
        });
        Self {
            config: snapshot.config,
            phase: snapshot.phase,
            seats,
            turn: snapshot.turn,
            winner: snapshot.winner,
            version: snapshot.version,
            rematch_votes: snapshot.rematch_votes,
            strikes: snapshot.strikes,
            turn_started: now,
            rematch_opened: now,
            pending: Vec::new(),
        }
    }

    /// Render the session for a player or a spectator. Players only see the
    /// shots on their opponent's board, never its intact ships.
    pub fn view(&self, perspective: Perspective) -> SessionView {
        let seats = Seat::ALL.map(|seat| {
            self.seats[seat.index()].as_ref().map(|p| {
                let reveal = match perspective {
                    Perspective::Spectator => true,
                    Perspective::Player(viewer) => viewer == p.user,
                };
                SeatView {
                    seat,
                    user: p.user,
                    connected: p.status == SeatStatus::Connected,
                    ready: p.board.is_finalized(),
                    ships_afloat: p.board.ships().iter().filter(|s| !s.is_sunk()).count(),
                    unplaced: if reveal {
                        p.board.remaining()
                    } else {
                        Vec::new()
                    },
                    grid: if reveal {
                        p.board.rows()
                    } else {
                        p.board.masked_rows()
                    },
                }
            })
        });
        SessionView {
            phase: self.phase,
            version: self.version,
            turn: self.turn,
            winner: self.winner,
            seats,
        }
    }
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new(GameConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Fleet;

    fn tiny() -> GameConfig {
        GameConfig::with_fleet(Fleet::new(vec![ShipType::new("Skiff", 1)]).unwrap())
    }

    fn started() -> GameSession {
        let mut game = GameSession::new(tiny());
        game.claim_seat(UserId(1)).unwrap();
        game.claim_seat(UserId(2)).unwrap();
        game.place_ship(UserId(1), Coord::new(0, 0), Orientation::Horizontal)
            .unwrap();
        game.place_ship(UserId(2), Coord::new(9, 9), Orientation::Horizontal)
            .unwrap();
        game.finalize(UserId(2)).unwrap();
        game.finalize(UserId(1)).unwrap();
        game
    }

    #[test]
    fn second_seat_starts_placement() {
        let mut game = GameSession::new(tiny());
        assert_eq!(game.claim_seat(UserId(4)), Ok(Seat::One));
        assert_eq!(game.phase(), GamePhase::WaitingForPlayers);
        assert_eq!(game.claim_seat(UserId(5)), Ok(Seat::Two));
        assert_eq!(game.phase(), GamePhase::PlacingShips);
        assert_eq!(game.claim_seat(UserId(6)), Err(GameError::SessionFull));
    }

    #[test]
    fn lowest_user_id_moves_first() {
        let game = started();
        assert_eq!(game.phase(), GamePhase::InProgress);
        assert_eq!(game.turn(), Some(UserId(1)));
    }

    #[test]
    fn every_event_bumps_version() {
        let mut game = started();
        let events = game.take_events();
        assert!(!events.is_empty());
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.version, i as u64 + 1);
        }
        assert_eq!(game.version(), events.len() as u64);
    }

    #[test]
    fn repeat_shot_keeps_turn() {
        let mut game = started();
        game.fire_at(UserId(1), Coord::new(5, 5)).unwrap();
        game.fire_at(UserId(2), Coord::new(5, 5)).unwrap();
        assert_eq!(
            game.fire_at(UserId(1), Coord::new(5, 5)),
            Err(GameError::AlreadyShot)
        );
        assert_eq!(game.turn(), Some(UserId(1)));
    }

    #[test]
    fn forfeit_hands_opponent_the_win() {
        let mut game = started();
        assert_eq!(game.forfeit(UserId(1)), Ok(UserId(2)));
        assert_eq!(game.phase(), GamePhase::GameOver);
        assert_eq!(game.winner(), Some(UserId(2)));
        assert_eq!(game.seat_of(UserId(1)), None);
    }

    #[test]
    fn opponent_grid_is_masked_for_players() {
        let game = started();
        let view = game.view(Perspective::Player(UserId(1)));
        let own = view.seats[0].as_ref().unwrap();
        let theirs = view.seats[1].as_ref().unwrap();
        assert_eq!(own.grid[0][0], CellState::Ship);
        assert_eq!(theirs.grid[9][9], CellState::Empty);
        let spectator = game.view(Perspective::Spectator);
        assert_eq!(spectator.seats[1].as_ref().unwrap().grid[9][9], CellState::Ship);
    }
}
