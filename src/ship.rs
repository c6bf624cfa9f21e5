//! Ship definitions and placement geometry.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{BoardError, Coord, Orientation};
use crate::config::Grid;

/// Type of ship: name and length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShipType {
    name: String,
    length: u8,
}

impl ShipType {
    pub fn new(name: impl Into<String>, length: u8) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u8 {
        self.length
    }
}

impl fmt::Display for ShipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (size {})", self.name, self.length)
    }
}

/// A ship laid out on the grid, with hits tracked in its own mask.
///
/// `cells` runs from the bow in the direction of `orientation`. The ship is
/// sunk exactly when every one of its cells has been hit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    kind: ShipType,
    orientation: Orientation,
    cells: Vec<Coord>,
    mask: Grid,
    hits: Grid,
}

impl Ship {
    /// Lay out `kind` with its bow at `bow`.
    ///
    /// Fails with `OutOfBounds` when any cell would leave the grid.
    pub fn new(kind: ShipType, bow: Coord, orientation: Orientation) -> Result<Self, BoardError> {
        let mut cells = Vec::with_capacity(kind.length() as usize);
        let mut mask = Grid::new();
        for i in 0..kind.length() {
            let cell = bow
                .step(orientation, i)
                .filter(Coord::in_bounds)
                .ok_or(BoardError::OutOfBounds)?;
            let (r, c) = cell.index();
            mask.set(r, c)?;
            cells.push(cell);
        }
        Ok(Ship {
            kind,
            orientation,
            cells,
            mask,
            hits: Grid::new(),
        })
    }

    pub fn kind(&self) -> &ShipType {
        &self.kind
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Cells in order from the bow.
    pub fn cells(&self) -> &[Coord] {
        &self.cells
    }

    /// The bow (first) cell.
    pub fn bow(&self) -> Option<Coord> {
        self.cells.first().copied()
    }

    /// Occupancy mask of the ship on the board.
    pub fn mask(&self) -> Grid {
        self.mask
    }

    pub fn contains(&self, coord: Coord) -> bool {
        let (r, c) = coord.index();
        self.mask.get(r, c).unwrap_or(false)
    }

    /// Record a hit at `coord`. Returns `false` if the ship does not cover it.
    pub(crate) fn register_hit(&mut self, coord: Coord) -> bool {
        if !self.contains(coord) {
            return false;
        }
        let (r, c) = coord.index();
        self.hits.set(r, c).is_ok()
    }

    /// Number of distinct cells hit so far.
    pub fn hit_count(&self) -> usize {
        self.hits.count_ones()
    }

    pub fn is_sunk(&self) -> bool {
        !self.cells.is_empty() && self.hits.contains_all(&self.mask)
    }
}

impl fmt::Debug for Ship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ship {{ name: \"{}\", bow: {:?}, orientation: {:?}, hits: {}/{} }}",
            self.kind.name(),
            self.bow(),
            self.orientation,
            self.hit_count(),
            self.cells.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_follow_orientation() -> Result<(), BoardError> {
        let ship = Ship::new(ShipType::new("Cruiser", 3), Coord::new(2, 1), Orientation::Vertical)?;
        assert_eq!(
            ship.cells(),
            &[Coord::new(2, 1), Coord::new(3, 1), Coord::new(4, 1)]
        );
        assert!(ship.contains(Coord::new(3, 1)));
        assert!(!ship.contains(Coord::new(5, 1)));
        Ok(())
    }

    #[test]
    fn rejects_ship_running_off_grid() {
        let err = Ship::new(ShipType::new("Carrier", 5), Coord::new(0, 7), Orientation::Horizontal)
            .unwrap_err();
        assert_eq!(err, BoardError::OutOfBounds);
    }

    #[test]
    fn sinks_after_every_cell_is_hit() -> Result<(), BoardError> {
        let mut ship = Ship::new(ShipType::new("Destroyer", 2), Coord::new(1, 1), Orientation::Horizontal)?;
        assert!(ship.register_hit(Coord::new(1, 1)));
        assert!(!ship.is_sunk());
        assert!(!ship.register_hit(Coord::new(0, 0)));
        assert!(ship.register_hit(Coord::new(1, 2)));
        assert!(ship.is_sunk());
        Ok(())
    }
}
