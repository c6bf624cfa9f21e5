//! Per-player board: ship placement, shot resolution and grid views.

use core::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::common::{BoardError, Coord, Orientation, ShotOutcome};
use crate::config::{Fleet, Grid, BOARD_SIZE};
use crate::ship::{Ship, ShipType};

/// State of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    Empty,
    Ship,
    Hit,
    Miss,
}

impl CellState {
    pub fn symbol(self) -> char {
        match self {
            CellState::Empty => '.',
            CellState::Ship => 'S',
            CellState::Hit => 'X',
            CellState::Miss => 'o',
        }
    }
}

/// One player's grid, ships and received shots.
///
/// Ships never overlap. Once `finalize_placement` succeeds the ship set is
/// frozen until `reset`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    fleet: Fleet,
    ships: Vec<Ship>,
    ship_map: Grid,
    hits: Grid,
    misses: Grid,
    finalized: bool,
}

impl Board {
    /// Create an empty board that must eventually hold `fleet`.
    pub fn new(fleet: Fleet) -> Self {
        Board {
            fleet,
            ships: Vec::new(),
            ship_map: Grid::new(),
            hits: Grid::new(),
            misses: Grid::new(),
            finalized: false,
        }
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn ships(&self) -> &[Ship] {
        &self.ships
    }

    /// Occupancy mask of all placed ships.
    pub fn ship_map(&self) -> Grid {
        self.ship_map
    }

    /// Every coordinate that has already been resolved.
    pub fn shots_received(&self) -> Grid {
        self.hits | self.misses
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Fleet entries not yet placed, in fleet order.
    pub fn remaining(&self) -> Vec<ShipType> {
        let mut placed: Vec<&ShipType> = self.ships.iter().map(Ship::kind).collect();
        let mut remaining = Vec::new();
        for kind in self.fleet.ships() {
            match placed.iter().position(|p| *p == kind) {
                Some(i) => {
                    placed.swap_remove(i);
                }
                None => remaining.push(kind.clone()),
            }
        }
        remaining
    }

    /// The next ship to place, following fleet order.
    pub fn next_unplaced(&self) -> Option<ShipType> {
        self.remaining().into_iter().next()
    }

    /// Add a ship to the board.
    ///
    /// Every cell must lie on the grid and clear of ships already placed, and
    /// the fleet must still have an unplaced slot of the same kind.
    pub fn place_ship(&mut self, ship: Ship) -> Result<(), BoardError> {
        if self.finalized {
            return Err(BoardError::PlacementLocked);
        }
        if ship.cells().is_empty() || !ship.cells().iter().all(Coord::in_bounds) {
            return Err(BoardError::OutOfBounds);
        }
        if !(self.ship_map & ship.mask()).is_empty() {
            return Err(BoardError::Overlap);
        }
        if !self.remaining().contains(ship.kind()) {
            return Err(BoardError::NotInFleet(ship.name().to_string()));
        }
        self.ship_map |= ship.mask();
        self.ships.push(ship);
        Ok(())
    }

    /// Freeze the ship set. Fails while any fleet entry is still unplaced.
    pub fn finalize_placement(&mut self) -> Result<(), BoardError> {
        if !self.remaining().is_empty() {
            return Err(BoardError::IncompleteFleet);
        }
        self.finalized = true;
        Ok(())
    }

    /// Resolve a shot at `coord`.
    ///
    /// A coordinate that was already resolved yields `AlreadyShot` and leaves
    /// the board untouched.
    pub fn receive_shot(&mut self, coord: Coord) -> Result<ShotOutcome, BoardError> {
        if !coord.in_bounds() {
            return Err(BoardError::OutOfBounds);
        }
        let (r, c) = coord.index();
        if self.hits.get(r, c)? || self.misses.get(r, c)? {
            return Ok(ShotOutcome::AlreadyShot);
        }
        if !self.ship_map.get(r, c)? {
            self.misses.set(r, c)?;
            return Ok(ShotOutcome::Miss);
        }
        self.hits.set(r, c)?;
        let ship = self
            .ships
            .iter_mut()
            .find(|s| s.contains(coord))
            .ok_or(BoardError::OutOfBounds)?;
        ship.register_hit(coord);
        if ship.is_sunk() {
            Ok(ShotOutcome::Sunk(ship.name().to_string()))
        } else {
            Ok(ShotOutcome::Hit)
        }
    }

    /// True iff every cell of every placed ship has been hit.
    pub fn is_defeated(&self) -> bool {
        self.hits.contains_all(&self.ship_map)
    }

    pub fn cell(&self, coord: Coord) -> CellState {
        let (r, c) = coord.index();
        if self.hits.get(r, c).unwrap_or(false) {
            CellState::Hit
        } else if self.misses.get(r, c).unwrap_or(false) {
            CellState::Miss
        } else if self.ship_map.get(r, c).unwrap_or(false) {
            CellState::Ship
        } else {
            CellState::Empty
        }
    }

    /// Full grid, ships included.
    pub fn rows(&self) -> Vec<Vec<CellState>> {
        self.collect_rows(|cell| cell)
    }

    /// Grid as the opponent knows it: intact ship cells read as water.
    pub fn masked_rows(&self) -> Vec<Vec<CellState>> {
        self.collect_rows(|cell| match cell {
            CellState::Ship => CellState::Empty,
            other => other,
        })
    }

    fn collect_rows(&self, map: impl Fn(CellState) -> CellState) -> Vec<Vec<CellState>> {
        (0..BOARD_SIZE)
            .map(|r| {
                (0..BOARD_SIZE)
                    .map(|c| map(self.cell(Coord::new(r, c))))
                    .collect()
            })
            .collect()
    }

    /// Returns a random non-overlapping bow and orientation for `kind`.
    pub fn random_placement<R: Rng>(
        &self,
        rng: &mut R,
        kind: &ShipType,
    ) -> Option<(Coord, Orientation)> {
        let len = kind.length();
        if len == 0 || len > BOARD_SIZE {
            return None;
        }
        for _ in 0..100 {
            let orientation = if rng.random() {
                Orientation::Horizontal
            } else {
                Orientation::Vertical
            };
            let (max_r, max_c) = match orientation {
                Orientation::Horizontal => (BOARD_SIZE - 1, BOARD_SIZE - len),
                Orientation::Vertical => (BOARD_SIZE - len, BOARD_SIZE - 1),
            };
            let bow = Coord::new(rng.random_range(0..=max_r), rng.random_range(0..=max_c));
            if let Ok(ship) = Ship::new(kind.clone(), bow, orientation) {
                if (self.ship_map & ship.mask()).is_empty() {
                    return Some((bow, orientation));
                }
            }
        }
        None
    }

    /// Clear ships and shots for a new game with the same fleet.
    pub fn reset(&mut self) {
        self.ships.clear();
        self.ship_map.clear_all();
        self.hits.clear_all();
        self.misses.clear_all();
        self.finalized = false;
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("ships", &self.ships)
            .field("finalized", &self.finalized)
            .field("hits", &self.hits.count_ones())
            .field("misses", &self.misses.count_ones())
            .finish()
    }
}

/// Render a grid with row letters and column numbers, e.g. for terminal output.
pub fn render_rows(rows: &[Vec<CellState>]) -> String {
    let mut out = String::from("  ");
    for c in 1..=rows.first().map_or(0, Vec::len) {
        out.push_str(&format!("{:>2}", c));
    }
    out.push('\n');
    for (r, row) in rows.iter().enumerate() {
        let label = (b'A' + r as u8) as char;
        let cells: Vec<String> = row.iter().map(|c| c.symbol().to_string()).collect();
        out.push_str(&format!("{:<2} {}\n", label, cells.join(" ")));
    }
    out
}
