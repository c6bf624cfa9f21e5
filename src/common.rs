//! Common types for Battleship: coordinates, shot outcomes and board errors.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bitboard::BitBoardError;
use crate::config::BOARD_SIZE;

/// Orientation of a ship on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// Extends to the right of the bow, along the row.
    Horizontal,
    /// Extends downward from the bow, along the column.
    Vertical,
}

impl FromStr for Orientation {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" | "HORIZONTAL" => Ok(Orientation::Horizontal),
            "V" | "VERTICAL" => Ok(Orientation::Vertical),
            _ => Err(CoordParseError::Orientation(s.trim().to_string())),
        }
    }
}

/// A zero-based grid position. Rendered as a row letter and a one-based
/// column number, so `Coord::new(1, 4)` displays as `B5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub row: u8,
    pub col: u8,
}

impl Coord {
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    /// Whether the coordinate lies on the `BOARD_SIZE`×`BOARD_SIZE` grid.
    pub fn in_bounds(&self) -> bool {
        self.row < BOARD_SIZE && self.col < BOARD_SIZE
    }

    /// The cell `steps` away from `self` along `orientation`, if it exists.
    pub fn step(&self, orientation: Orientation, steps: u8) -> Option<Coord> {
        match orientation {
            Orientation::Horizontal => self.col.checked_add(steps).map(|c| Coord::new(self.row, c)),
            Orientation::Vertical => self.row.checked_add(steps).map(|r| Coord::new(r, self.col)),
        }
    }

    pub(crate) fn index(&self) -> (usize, usize) {
        (self.row as usize, self.col as usize)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match b'A'.checked_add(self.row).filter(u8::is_ascii_uppercase) {
            Some(letter) => write!(f, "{}{}", letter as char, self.col as u16 + 1),
            None => write!(f, "({}, {})", self.row, self.col),
        }
    }
}

impl FromStr for Coord {
    type Err = CoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_uppercase();
        let mut chars = s.chars();
        let letter = chars.next().ok_or(CoordParseError::Empty)?;
        let last_row = (b'A' + BOARD_SIZE - 1) as char;
        if !('A'..=last_row).contains(&letter) {
            return Err(CoordParseError::Row(letter));
        }
        let digits = chars.as_str();
        if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoordParseError::Format(s.clone()));
        }
        let col: u8 = digits
            .parse()
            .map_err(|_| CoordParseError::Format(s.clone()))?;
        if col == 0 || col > BOARD_SIZE {
            return Err(CoordParseError::Column(col));
        }
        Ok(Coord::new(letter as u8 - b'A', col - 1))
    }
}

/// Reasons a textual coordinate or orientation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordParseError {
    #[error("empty coordinate")]
    Empty,
    #[error("invalid row letter '{0}'")]
    Row(char),
    #[error("column {0} is off the board")]
    Column(u8),
    #[error("invalid format '{0}', expected a letter followed by a number (e.g. A1)")]
    Format(String),
    #[error("invalid orientation '{0}', expected H or V")]
    Orientation(String),
}

/// Result of resolving a shot against a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotOutcome {
    /// Shot struck a ship that is still afloat.
    Hit,
    /// Shot landed in open water.
    Miss,
    /// Shot struck the last intact cell of a ship, carrying its name.
    Sunk(String),
    /// The cell had been resolved earlier; nothing changed.
    AlreadyShot,
}

impl ShotOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, ShotOutcome::Hit | ShotOutcome::Sunk(_))
    }
}

impl fmt::Display for ShotOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShotOutcome::Hit => write!(f, "HIT"),
            ShotOutcome::Miss => write!(f, "MISS"),
            ShotOutcome::Sunk(name) => write!(f, "HIT! Sunk {}", name),
            ShotOutcome::AlreadyShot => write!(f, "already shot"),
        }
    }
}

/// Errors returned by Board operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("bitboard error: {0}")]
    BitBoard(#[from] BitBoardError),
    /// A ship cell or a shot lies off the grid.
    #[error("coordinate is out of bounds")]
    OutOfBounds,
    /// Ship placement intersects an already placed ship.
    #[error("ship placement overlaps with another ship")]
    Overlap,
    /// Not every ship of the fleet has been placed.
    #[error("not all ships of the fleet have been placed")]
    IncompleteFleet,
    /// No unplaced slot in the fleet matches this ship.
    #[error("ship {0} is not part of the remaining fleet")]
    NotInFleet(String),
    /// Placement was already finalized; the ship set is immutable.
    #[error("ship placement is already finalized")]
    PlacementLocked,
}
