use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// Identifier of a worker within one run. Worker `0` is the coordinator.
#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl WorkerId {
    pub const COORDINATOR: WorkerId = WorkerId(0);

    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn is_coordinator(self) -> bool {
        self == Self::COORDINATOR
    }
}

impl Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker{}", self.0)
    }
}

/// Width and height of a two-dimensional pixel region.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
}

impl Extent {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn volume(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns true if the signed coordinate `(x, y)` lies inside `[0,width) x [0,height)`.
    #[inline(always)]
    pub fn contains(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }
}

impl Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Number of worker columns and rows in the process grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub cols: usize,
    pub rows: usize,
}

impl GridShape {
    pub fn num_workers(&self) -> usize {
        self.cols * self.rows
    }

    /// Row-major worker id of the grid cell `pos`.
    pub fn worker_at(&self, pos: GridPos) -> WorkerId {
        debug_assert!(pos.col < self.cols && pos.row < self.rows);
        WorkerId(pos.row * self.cols + pos.col)
    }

    pub fn position_of(&self, id: WorkerId) -> GridPos {
        GridPos {
            col: id.0 % self.cols,
            row: id.0 / self.cols,
        }
    }

    /// Moves `pos` by `(dx, dy)` and returns the resulting cell, or `None` if it falls outside
    /// the grid. The grid is not periodic.
    pub fn shift(&self, pos: GridPos, dx: isize, dy: isize) -> Option<GridPos> {
        let col = pos.col as isize + dx;
        let row = pos.row as isize + dy;

        if col >= 0 && row >= 0 && (col as usize) < self.cols && (row as usize) < self.rows {
            Some(GridPos {
                col: col as usize,
                row: row as usize,
            })
        } else {
            None
        }
    }
}

impl Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Position `(col, row)` of a worker within the grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub col: usize,
    pub row: usize,
}

impl GridPos {
    pub const fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

impl Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.col, self.row)
    }
}

/// The eight logical neighbor directions. `Up` points towards row zero of the image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::UpLeft,
        Direction::UpRight,
        Direction::DownLeft,
        Direction::DownRight,
    ];

    pub const CARDINALS: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub const DIAGONALS: [Direction; 4] = [
        Direction::UpLeft,
        Direction::UpRight,
        Direction::DownLeft,
        Direction::DownRight,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Grid displacement `(dx, dy)` of this direction.
    pub fn offset(self) -> (isize, isize) {
        use Direction::*;
        match self {
            Up => (0, -1),
            Down => (0, 1),
            Left => (-1, 0),
            Right => (1, 0),
            UpLeft => (-1, -1),
            UpRight => (1, -1),
            DownLeft => (-1, 1),
            DownRight => (1, 1),
        }
    }

    pub fn opposite(self) -> Self {
        use Direction::*;
        match self {
            Up => Down,
            Down => Up,
            Left => Right,
            Right => Left,
            UpLeft => DownRight,
            UpRight => DownLeft,
            DownLeft => UpRight,
            DownRight => UpLeft,
        }
    }

    pub fn is_diagonal(self) -> bool {
        let (dx, dy) = self.offset();
        dx != 0 && dy != 0
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}
