use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bitboard::BitBoard;
use crate::game::Seat;
use crate::ship::ShipType;

pub const BOARD_SIZE: u8 = 10;

/// Bit grid covering the whole board.
pub type Grid = BitBoard<u128, { BOARD_SIZE as usize }>;

/// Default session key used when the server is not told otherwise.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("a fleet needs at least one ship")]
    EmptyFleet,
    #[error("ship {name} has invalid length {length}")]
    ShipLength { name: String, length: u8 },
    #[error("fleet covers {0} cells, more than the board holds")]
    FleetTooLarge(usize),
    #[error("{0} must be longer than zero")]
    ZeroDuration(&'static str),
    #[error("idle timeout {idle:?} must exceed the heartbeat interval {heartbeat:?}")]
    IdleBelowHeartbeat { idle: Duration, heartbeat: Duration },
    #[error("max frame size must be at least one byte")]
    ZeroFrameSize,
}

/// The ships one player must place before the game can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fleet {
    ships: Vec<ShipType>,
}

impl Fleet {
    pub fn new(ships: Vec<ShipType>) -> Result<Self, ConfigError> {
        if ships.is_empty() {
            return Err(ConfigError::EmptyFleet);
        }
        if let Some(bad) = ships
            .iter()
            .find(|s| s.length() == 0 || s.length() > BOARD_SIZE)
        {
            return Err(ConfigError::ShipLength {
                name: bad.name().to_string(),
                length: bad.length(),
            });
        }
        let cells: usize = ships.iter().map(|s| s.length() as usize).sum();
        if cells > (BOARD_SIZE as usize).pow(2) {
            return Err(ConfigError::FleetTooLarge(cells));
        }
        Ok(Self { ships })
    }

    /// Carrier, Battleship, Cruiser, Submarine, Destroyer.
    pub fn classic() -> Self {
        Self {
            ships: vec![
                ShipType::new("Carrier", 5),
                ShipType::new("Battleship", 4),
                ShipType::new("Cruiser", 3),
                ShipType::new("Submarine", 3),
                ShipType::new("Destroyer", 2),
            ],
        }
    }

    /// Ships in placement order.
    pub fn ships(&self) -> &[ShipType] {
        &self.ships
    }

    pub fn total_cells(&self) -> usize {
        self.ships.iter().map(|s| s.length() as usize).sum()
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::classic()
    }
}

/// Rules for one game instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameConfig {
    fleets: [Fleet; 2],
}

impl GameConfig {
    /// Both seats play with `fleet`.
    pub fn with_fleet(fleet: Fleet) -> Self {
        Self {
            fleets: [fleet.clone(), fleet],
        }
    }

    /// Override the fleet of a single seat (handicap games).
    pub fn with_seat_fleet(mut self, seat: Seat, fleet: Fleet) -> Self {
        self.fleets[seat.index()] = fleet;
        self
    }

    pub fn fleet(&self, seat: Seat) -> &Fleet {
        &self.fleets[seat.index()]
    }
}

/// Runtime settings for the server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Key under which the game snapshot is persisted.
    pub session_id: String,
    /// Directory for snapshot files; `None` keeps snapshots in memory.
    pub state_dir: Option<PathBuf>,
    /// How long a disconnected player may stay away before forfeiting.
    /// `None` waits indefinitely.
    pub reconnect_grace: Option<Duration>,
    /// How long the player to move may take. The first timeout skips the
    /// turn, the second forfeits the game. `None` disables the clock.
    pub turn_timeout: Option<Duration>,
    /// How long players have to answer the rematch poll before an
    /// unanswered seat counts as declining.
    pub rematch_timeout: Option<Duration>,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    /// Per-spectator queue depth; a spectator that falls this far behind is dropped.
    pub spectator_buffer: usize,
    pub max_frame_size: u32,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5005".to_string(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            state_dir: None,
            reconnect_grace: None,
            turn_timeout: None,
            rematch_timeout: None,
            heartbeat_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(45),
            spectator_buffer: 256,
            max_frame_size: crate::transport::tcp::MAX_MESSAGE_SIZE,
            game: GameConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reject settings the connection and lobby loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat interval"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("idle timeout"));
        }
        if self.idle_timeout <= self.heartbeat_interval {
            return Err(ConfigError::IdleBelowHeartbeat {
                idle: self.idle_timeout,
                heartbeat: self.heartbeat_interval,
            });
        }
        if self.turn_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroDuration("turn timeout"));
        }
        if self.rematch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroDuration("rematch timeout"));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::ZeroFrameSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_fleet_has_seventeen_cells() {
        assert_eq!(Fleet::classic().total_cells(), 17);
    }

    #[test]
    fn rejects_degenerate_fleets() {
        assert_eq!(Fleet::new(vec![]), Err(ConfigError::EmptyFleet));
        assert!(matches!(
            Fleet::new(vec![ShipType::new("Raft", 0)]),
            Err(ConfigError::ShipLength { .. })
        ));
        assert!(matches!(
            Fleet::new(vec![ShipType::new("Ark", 11)]),
            Err(ConfigError::ShipLength { .. })
        ));
    }

    #[test]
    fn default_server_config_is_valid() {
        assert_eq!(ServerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_timings_the_server_cannot_run_with() {
        let zero_heartbeat = ServerConfig {
            heartbeat_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert_eq!(
            zero_heartbeat.validate(),
            Err(ConfigError::ZeroDuration("heartbeat interval"))
        );

        let zero_idle = ServerConfig {
            idle_timeout: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert_eq!(zero_idle.validate(), Err(ConfigError::ZeroDuration("idle timeout")));

        let idle_too_short = ServerConfig {
            heartbeat_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        };
        assert!(matches!(
            idle_too_short.validate(),
            Err(ConfigError::IdleBelowHeartbeat { .. })
        ));

        let zero_turn = ServerConfig {
            turn_timeout: Some(Duration::ZERO),
            ..ServerConfig::default()
        };
        assert_eq!(zero_turn.validate(), Err(ConfigError::ZeroDuration("turn timeout")));
    }

    #[test]
    fn seat_fleet_overrides_one_side() {
        let small = Fleet::new(vec![ShipType::new("Dinghy", 1)]).unwrap();
        let config = GameConfig::default().with_seat_fleet(Seat::Two, small.clone());
        assert_eq!(config.fleet(Seat::One), &Fleet::classic());
        assert_eq!(config.fleet(Seat::Two), &small);
    }
}
