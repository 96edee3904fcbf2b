//! Two-dimensional, non-periodic process grid.
use crate::prelude::*;
use crate::{Direction, GridPos, GridShape, WorkerId};
use serde::{Deserialize, Serialize};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("at least one worker is required")]
    NoWorkers,

    #[error("{0} does not exist in a grid of {1} workers")]
    InvalidWorker(WorkerId, usize),
}

/// Factorizes `num_workers` into `cols x rows` such that `cols - rows` is minimal and
/// `cols >= rows`. This is the factorization `MPI_Dims_create` picks for two dimensions, with
/// the larger dimension along `x`.
pub fn balanced_grid(num_workers: usize) -> Result<GridShape, TopologyError> {
    if num_workers == 0 {
        return Err(TopologyError::NoWorkers);
    }

    let mut rows = (num_workers as f64).sqrt() as usize;
    while rows > 1 && num_workers % rows != 0 {
        rows -= 1;
    }

    Ok(GridShape {
        cols: num_workers / rows,
        rows,
    })
}

/// The eight logical neighbors of one worker, `None` where the grid ends.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbors {
    ids: [Option<WorkerId>; 8],
}

impl Neighbors {
    #[inline]
    pub fn get(&self, dir: Direction) -> Option<WorkerId> {
        self.ids[dir.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, WorkerId)> + '_ {
        Direction::ALL
            .iter()
            .filter_map(move |&d| self.get(d).map(|id| (d, id)))
    }

    pub fn count(&self) -> usize {
        self.ids.iter().filter(|id| id.is_some()).count()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    grid: GridShape,
}

impl Topology {
    pub fn new(num_workers: usize) -> Result<Self, TopologyError> {
        Ok(Self {
            grid: balanced_grid(num_workers)?,
        })
    }

    pub fn with_grid(grid: GridShape) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> GridShape {
        self.grid
    }

    pub fn num_workers(&self) -> usize {
        self.grid.num_workers()
    }

    fn check(&self, id: WorkerId) -> Result<(), TopologyError> {
        if id.get() < self.num_workers() {
            Ok(())
        } else {
            Err(TopologyError::InvalidWorker(id, self.num_workers()))
        }
    }

    pub fn position_of(&self, id: WorkerId) -> Result<GridPos, TopologyError> {
        self.check(id)?;
        Ok(self.grid.position_of(id))
    }

    /// Worker occupying `pos + (dx, dy)`, if that cell is inside the grid.
    pub fn worker_at_offset(&self, pos: GridPos, dx: isize, dy: isize) -> Option<WorkerId> {
        self.grid
            .shift(pos, dx, dy)
            .map(|p| self.grid.worker_at(p))
    }

    pub fn neighbors_of(&self, id: WorkerId) -> Result<Neighbors, TopologyError> {
        let pos = self.position_of(id)?;
        let mut ids = [None; 8];

        for &dir in &Direction::ALL {
            let (dx, dy) = dir.offset();
            ids[dir.index()] = self.worker_at_offset(pos, dx, dy);
        }

        Ok(Neighbors { ids })
    }
}
