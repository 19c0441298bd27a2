use std::time::Duration;

use super::{Bucket, Cell, CellCoord, GridCoord, CELLS_PER_GRID, TOTAL_GRIDS};
use crate::core::time::IntervalTimer;
use crate::world::entity::Guid;

/// Lifecycle of a grid.
///
/// ```text
///   Invalid ──create──▶ Idle ◀──────────── Active
///                        │  ▲  player or active   ▲
///              no viewer │  │  object nearby      │
///                        ▼  │                     │
///                      Removal ──viewer returns───┘
///                        │
///                        └─ expiry passes ─▶ unload (refused: retry at 1/10 of the delay)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    Invalid,
    Active,
    Idle,
    Removal,
}

pub struct Grid {
    coord: GridCoord,
    state: GridState,
    cells: Vec<Cell>,
    loaded: bool,
    unload_lock: bool,
    unload_delay: Duration,
    expiry: IntervalTimer,
    relocation: IntervalTimer,
}

impl Grid {
    fn new(coord: GridCoord, unload_delay: Duration, notify_period: Duration, unload_lock: bool) -> Self {
        Self {
            coord,
            state: GridState::Invalid,
            cells: vec![Cell::default(); (CELLS_PER_GRID * CELLS_PER_GRID) as usize],
            loaded: false,
            unload_lock,
            unload_delay,
            expiry: IntervalTimer::new(unload_delay),
            relocation: IntervalTimer::new(notify_period),
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn set_state(&mut self, state: GridState) {
        self.state = state;
    }

    /// Whether the grid's spawn data has been instantiated.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Flags the grid as loaded. Returns false if it already was.
    pub fn mark_loaded(&mut self) -> bool {
        !std::mem::replace(&mut self.loaded, true)
    }

    pub fn is_unload_locked(&self) -> bool {
        self.unload_lock
    }

    pub fn set_unload_lock(&mut self, locked: bool) {
        self.unload_lock = locked;
    }

    /// Restart the expiry countdown with the full unload delay.
    pub fn reset_expiry(&mut self) {
        self.expiry.restart(self.unload_delay);
    }

    /// Restart the expiry countdown after a refused unload, at a tenth of the delay.
    pub fn retry_expiry(&mut self) {
        self.expiry.restart(self.unload_delay / 10);
    }

    pub fn expiry_mut(&mut self) -> &mut IntervalTimer {
        &mut self.expiry
    }

    pub fn relocation_mut(&mut self) -> &mut IntervalTimer {
        &mut self.relocation
    }

    pub fn cell(&self, cell: CellCoord) -> &Cell {
        &self.cells[cell.local_index()]
    }

    pub fn cell_mut(&mut self, cell: CellCoord) -> &mut Cell {
        &mut self.cells[cell.local_index()]
    }

    /// Every entity in every cell of the grid.
    pub fn guids(&self) -> Vec<Guid> {
        self.cells
            .iter()
            .flat_map(|cell| cell.iter(super::Interest::ALL))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

/// Sparse storage for the 64 x 64 grids of one map. Grids are allocated on first use and
/// released on unload.
pub struct GridIndex {
    grids: Vec<Option<Box<Grid>>>,
    unload_delay: Duration,
    notify_period: Duration,
    unload_lock: bool,
}

impl GridIndex {
    /// `unload_lock` marks every grid created by this index as never unloading.
    pub fn new(unload_delay: Duration, notify_period: Duration, unload_lock: bool) -> Self {
        let mut grids = Vec::with_capacity(TOTAL_GRIDS);
        grids.resize_with(TOTAL_GRIDS, || None);
        Self {
            grids,
            unload_delay,
            notify_period,
            unload_lock,
        }
    }

    pub fn get(&self, coord: GridCoord) -> Option<&Grid> {
        self.grids.get(coord.id()).and_then(|g| g.as_deref())
    }

    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut Grid> {
        self.grids.get_mut(coord.id()).and_then(|g| g.as_deref_mut())
    }

    pub fn is_created(&self, coord: GridCoord) -> bool {
        self.get(coord).is_some()
    }

    pub fn is_loaded(&self, coord: GridCoord) -> bool {
        self.get(coord).is_some_and(Grid::is_loaded)
    }

    /// Returns the grid at `coord`, allocating it in the Idle state if needed, and whether it
    /// was created by this call.
    pub fn ensure_created(&mut self, coord: GridCoord) -> (&mut Grid, bool) {
        let (unload_delay, notify_period, unload_lock) = (self.unload_delay, self.notify_period, self.unload_lock);
        let slot = &mut self.grids[coord.id()];
        let created = slot.is_none();
        let grid = slot.get_or_insert_with(|| {
            let mut grid = Grid::new(coord, unload_delay, notify_period, unload_lock);
            grid.set_state(GridState::Idle);
            Box::new(grid)
        });
        (&mut **grid, created)
    }

    pub fn release(&mut self, coord: GridCoord) -> Option<Box<Grid>> {
        self.grids.get_mut(coord.id()).and_then(Option::take)
    }

    /// The cell, if its grid exists.
    pub fn cell(&self, cell: CellCoord) -> Option<&Cell> {
        self.get(cell.grid()).map(|grid| grid.cell(cell))
    }

    /// Insert into a created grid. Returns false when the grid does not exist.
    pub fn insert(&mut self, guid: Guid, bucket: Bucket, cell: CellCoord) -> bool {
        match self.get_mut(cell.grid()) {
            Some(grid) => {
                grid.cell_mut(cell).insert(bucket, guid);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, guid: Guid, bucket: Bucket, cell: CellCoord) -> bool {
        self.get_mut(cell.grid())
            .is_some_and(|grid| grid.cell_mut(cell).remove(bucket, guid))
    }

    pub fn coords(&self) -> Vec<GridCoord> {
        self.iter().map(Grid::coord).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grid> {
        self.grids.iter().filter_map(|g| g.as_deref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Grid> {
        self.grids.iter_mut().filter_map(|g| g.as_deref_mut())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn loaded_count(&self) -> usize {
        self.iter().filter(|g| g.is_loaded()).count()
    }
}
