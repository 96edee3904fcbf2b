//! Block decomposition of the image over the worker grid.
//!
//! Each axis is split independently: every worker receives `size / workers` pixels and the
//! first `size % workers` workers along the axis receive one extra pixel. All quantities are
//! pure functions of `(image, grid, position)`, which allows any worker to compute the tile of
//! any other worker without communication.
use crate::prelude::*;
use crate::{Extent, GridPos, GridShape, WorkerId};
use serde::{Deserialize, Serialize};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("image {image} is too small for a {grid} worker grid: {worker} would own an empty tile")]
    EmptyTile {
        image: Extent,
        grid: GridShape,
        worker: WorkerId,
    },

    #[error("tiles of {extent} pixels along the {axis} axis are narrower than the kernel radius {khalf}")]
    HaloTooWide {
        axis: &'static str,
        extent: usize,
        khalf: usize,
    },

    #[error("partition table entry of {worker} is {found:?}, expected {expected:?}")]
    Mismatch {
        worker: WorkerId,
        found: TileRecord,
        expected: TileRecord,
    },
}

/// One-dimensional share of an axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AxisSpan {
    pub length: usize,
    pub start: usize,
}

impl AxisSpan {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Splits an axis of `axis_size` pixels over `axis_workers` workers and returns the share of
/// worker `axis_index`.
pub fn partition(axis_size: usize, axis_workers: usize, axis_index: usize) -> AxisSpan {
    assert!(axis_workers > 0 && axis_index < axis_workers);
    let base = axis_size / axis_workers;
    let remainder = axis_size % axis_workers;

    AxisSpan {
        length: base + (axis_index < remainder) as usize,
        start: axis_index * base + min(axis_index, remainder),
    }
}

/// Shape and placement of one worker's tile inside the full image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TileLayout {
    pub extent: Extent,
    pub start_x: usize,
    pub start_y: usize,
    pub image: Extent,
}

impl TileLayout {
    pub fn compute(image: Extent, grid: GridShape, pos: GridPos) -> Self {
        let x = partition(image.width, grid.cols, pos.col);
        let y = partition(image.height, grid.rows, pos.row);

        Self {
            extent: Extent::new(x.length, y.length),
            start_x: x.start,
            start_y: y.start,
            image,
        }
    }

    /// Linear index of the top-left pixel of the tile within the row-major image.
    pub fn start_index(&self) -> usize {
        self.start_y * self.image.width + self.start_x
    }

    pub fn record(&self) -> TileRecord {
        TileRecord {
            width: self.extent.width,
            height: self.extent.height,
            start_index: self.start_index(),
        }
    }
}

/// Entry of the partition table, as exchanged between workers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRecord {
    pub width: usize,
    pub height: usize,
    pub start_index: usize,
}

impl TileRecord {
    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// `[width, height, start_index]`, the form in which records travel between workers.
    pub fn to_words(&self) -> [u64; 3] {
        [self.width as u64, self.height as u64, self.start_index as u64]
    }

    pub fn from_words(words: [u64; 3]) -> Self {
        let [width, height, start_index] = words;
        Self {
            width: width as usize,
            height: height as usize,
            start_index: start_index as usize,
        }
    }
}

/// Tile width, height and start index of every worker, indexed by worker id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionTable {
    widths: Vec<usize>,
    heights: Vec<usize>,
    start_indices: Vec<usize>,
}

impl PartitionTable {
    pub fn compute(image: Extent, grid: GridShape) -> Self {
        let records = (0..grid.num_workers())
            .map(|i| TileLayout::compute(image, grid, grid.position_of(WorkerId(i))).record())
            .collect_vec();

        Self::from_records(&records)
    }

    pub fn from_records(records: &[TileRecord]) -> Self {
        Self {
            widths: records.iter().map(|r| r.width).collect(),
            heights: records.iter().map(|r| r.height).collect(),
            start_indices: records.iter().map(|r| r.start_index).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    pub fn get(&self, id: WorkerId) -> TileRecord {
        let i = id.get();
        TileRecord {
            width: self.widths[i],
            height: self.heights[i],
            start_index: self.start_indices[i],
        }
    }

    pub fn extent_of(&self, id: WorkerId) -> Extent {
        Extent::new(self.widths[id.get()], self.heights[id.get()])
    }

    pub fn start_index_of(&self, id: WorkerId) -> usize {
        self.start_indices[id.get()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, TileRecord)> + '_ {
        (0..self.len()).map(move |i| (WorkerId(i), self.get(WorkerId(i))))
    }

    /// Checks every entry against `expected` and reports the first disagreement.
    pub fn verify(&self, expected: &PartitionTable) -> Result<(), PartitionError> {
        for (id, found) in self.iter() {
            let expected = expected.get(id);
            if found != expected {
                return Err(PartitionError::Mismatch {
                    worker: id,
                    found,
                    expected,
                });
            }
        }

        Ok(())
    }
}

/// Rejects decompositions the halo protocol cannot serve: empty tiles, and tiles that are
/// thinner than the kernel radius along an axis that is split over multiple workers.
pub fn check_partition(image: Extent, grid: GridShape, khalf: usize) -> Result<(), PartitionError> {
    // the last worker along each axis owns the smallest share
    let smallest = Extent::new(image.width / grid.cols, image.height / grid.rows);

    if smallest.is_empty() {
        let worker = grid.worker_at(GridPos::new(
            if image.width < grid.cols { grid.cols - 1 } else { 0 },
            if image.height < grid.rows { grid.rows - 1 } else { 0 },
        ));

        return Err(PartitionError::EmptyTile {
            image,
            grid,
            worker,
        });
    }

    if grid.cols > 1 && smallest.width < khalf {
        return Err(PartitionError::HaloTooWide {
            axis: "x",
            extent: smallest.width,
            khalf,
        });
    }

    if grid.rows > 1 && smallest.height < khalf {
        return Err(PartitionError::HaloTooWide {
            axis: "y",
            extent: smallest.height,
            khalf,
        });
    }

    Ok(())
}
