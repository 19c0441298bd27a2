//! Spatial partitioning of a map.
//!
//! A map is a square of 64 x 64 grids, each subdivided into 8 x 8 cells. Cells are the unit of
//! spatial queries; grids are the unit of lazy loading and unloading.
//!
//! ```text
//!   map (64 x 64 grids)           grid (8 x 8 cells)
//!   ┌───┬───┬───┬─ ─┐             ┌──┬──┬──┬─ ─┐
//!   │0,0│1,0│2,0│   │             │  │  │  │   │   each cell holds a world bucket
//!   ├───┼───┼───┼─ ─┤             ├──┼──┼──┼─ ─┤   (players, creatures, dynamic
//!   │0,1│1,1│   │   │             │  │  │  │   │   objects, corpses) and a grid
//!   └───┴───┴───┴─ ─┘             └──┴──┴──┴─ ─┘   bucket (gameobjects, area
//!                                                  triggers, transports)
//! ```

mod cell;
mod index;

pub use cell::{Bucket, Cell, Interest};
pub use index::{Grid, GridIndex, GridState};

use super::position::is_valid_map_coord;

pub const GRIDS_PER_SIDE: u32 = 64;
pub const CELLS_PER_GRID: u32 = 8;
pub const CELLS_PER_SIDE: u32 = GRIDS_PER_SIDE * CELLS_PER_GRID;
pub const TOTAL_CELLS: usize = (CELLS_PER_SIDE * CELLS_PER_SIDE) as usize;
pub const TOTAL_GRIDS: usize = (GRIDS_PER_SIDE * GRIDS_PER_SIDE) as usize;

pub const GRID_SIZE: f32 = 533.333_33;
pub const CELL_SIZE: f32 = GRID_SIZE / CELLS_PER_GRID as f32;
pub const MAP_SIZE: f32 = GRID_SIZE * GRIDS_PER_SIDE as f32;
pub const MAP_HALF_SIZE: f32 = MAP_SIZE / 2.0;
pub const MAX_HEIGHT: f32 = 100_000.0;

fn cell_axis(v: f32) -> i64 {
    ((f64::from(v) + f64::from(MAP_HALF_SIZE)) / f64::from(CELL_SIZE)).floor() as i64
}

fn clamp_axis(v: i64) -> u32 {
    v.clamp(0, i64::from(CELLS_PER_SIDE) - 1) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

impl CellCoord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The cell containing `(x, y)`, or `None` for coordinates outside the map.
    pub fn from_position(x: f32, y: f32) -> Option<Self> {
        if !is_valid_map_coord(x, y) {
            return None;
        }
        Some(Self::new(clamp_axis(cell_axis(x)), clamp_axis(cell_axis(y))))
    }

    pub fn from_id(id: usize) -> Self {
        let side = CELLS_PER_SIDE as usize;
        Self::new((id % side) as u32, (id / side) as u32)
    }

    /// Dense index of the cell, used for visited-cell bitsets.
    pub fn id(&self) -> usize {
        self.y as usize * CELLS_PER_SIDE as usize + self.x as usize
    }

    pub fn is_valid(&self) -> bool {
        self.x < CELLS_PER_SIDE && self.y < CELLS_PER_SIDE
    }

    pub fn grid(&self) -> GridCoord {
        GridCoord::new(self.x / CELLS_PER_GRID, self.y / CELLS_PER_GRID)
    }

    /// Index of the cell inside its grid.
    pub fn local_index(&self) -> usize {
        ((self.y % CELLS_PER_GRID) * CELLS_PER_GRID + self.x % CELLS_PER_GRID) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn from_position(x: f32, y: f32) -> Option<Self> {
        CellCoord::from_position(x, y).map(|cell| cell.grid())
    }

    pub fn id(&self) -> usize {
        self.y as usize * GRIDS_PER_SIDE as usize + self.x as usize
    }

    pub fn is_valid(&self) -> bool {
        self.x < GRIDS_PER_SIDE && self.y < GRIDS_PER_SIDE
    }

    /// Cell in the lower corner of this grid.
    pub fn first_cell(&self) -> CellCoord {
        CellCoord::new(self.x * CELLS_PER_GRID, self.y * CELLS_PER_GRID)
    }

    pub fn cells(&self) -> CellArea {
        let min = self.first_cell();
        CellArea {
            min,
            max: CellCoord::new(min.x + CELLS_PER_GRID - 1, min.y + CELLS_PER_GRID - 1),
        }
    }

    /// The cells of this grid widened by `margin` cells on every side, clamped to the map.
    pub fn surrounding(&self, margin: u32) -> CellArea {
        let area = self.cells();
        let margin = i64::from(margin);
        CellArea {
            min: CellCoord::new(
                clamp_axis(i64::from(area.min.x) - margin),
                clamp_axis(i64::from(area.min.y) - margin),
            ),
            max: CellCoord::new(
                clamp_axis(i64::from(area.max.x) + margin),
                clamp_axis(i64::from(area.max.y) + margin),
            ),
        }
    }
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.y)
    }
}

/// An inclusive rectangle of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellArea {
    pub min: CellCoord,
    pub max: CellCoord,
}

impl CellArea {
    /// Every cell touched by the square of half-width `radius` centred on `(x, y)`,
    /// clamped to the map.
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        let radius = radius.max(0.0);
        Self {
            min: CellCoord::new(clamp_axis(cell_axis(x - radius)), clamp_axis(cell_axis(y - radius))),
            max: CellCoord::new(clamp_axis(cell_axis(x + radius)), clamp_axis(cell_axis(y + radius))),
        }
    }

    pub fn contains(&self, cell: CellCoord) -> bool {
        (self.min.x..=self.max.x).contains(&cell.x) && (self.min.y..=self.max.y).contains(&cell.y)
    }

    /// Number of cells covered. An area always covers at least one cell.
    pub fn cell_count(&self) -> usize {
        ((self.max.x - self.min.x + 1) * (self.max.y - self.min.y + 1)) as usize
    }

    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (self.min.y..=self.max.y).flat_map(move |y| (self.min.x..=self.max.x).map(move |x| CellCoord::new(x, y)))
    }

    /// Grids overlapped by this area.
    pub fn grids(&self) -> impl Iterator<Item = GridCoord> + '_ {
        let min = self.min.grid();
        let max = self.max.grid();
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| GridCoord::new(x, y)))
    }
}
