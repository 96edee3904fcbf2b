//! Indexed views over the flat buffers that hold a tile, its four halo strips, and strided
//! sub-regions of either.
use crate::prelude::*;
use crate::{Direction, Extent};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Structured transfer descriptor: `count` blocks of `block` consecutive elements, the start
/// of each block `stride` elements after the start of the previous one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StridedLayout {
    pub count: usize,
    pub block: usize,
    pub stride: usize,
}

impl StridedLayout {
    pub fn new(count: usize, block: usize, stride: usize) -> Self {
        assert!(count <= 1 || block <= stride, "blocks of a strided layout overlap");
        Self {
            count,
            block,
            stride,
        }
    }

    pub fn contiguous(len: usize) -> Self {
        Self {
            count: 1,
            block: len,
            stride: len,
        }
    }

    /// Number of elements described by the layout.
    pub fn len(&self) -> usize {
        self.count * self.block
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements between the first and one past the last element touched.
    pub fn span(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.count - 1) * self.stride + self.block
        }
    }

    fn ranges(&self, offset: usize) -> impl Iterator<Item = Range<usize>> {
        let StridedLayout { block, stride, .. } = *self;
        (0..self.count).map(move |i| {
            let start = offset + i * stride;
            start..start + block
        })
    }

    /// Blocks of `data` selected by this layout starting at `offset`.
    pub fn blocks<'a, T>(&self, data: &'a [T], offset: usize) -> impl Iterator<Item = &'a [T]> {
        assert!(offset + self.span() <= data.len(), "strided layout out of bounds");
        self.ranges(offset).map(move |r| &data[r])
    }

    pub fn gather<T: Copy>(&self, data: &[T], offset: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for block in self.blocks(data, offset) {
            out.extend_from_slice(block);
        }
        out
    }

    /// Writes the packed `values` into the blocks of `data` selected by this layout.
    pub fn scatter<T: Copy>(&self, data: &mut [T], offset: usize, values: &[T]) {
        assert_eq!(values.len(), self.len());
        assert!(offset + self.span() <= data.len(), "strided layout out of bounds");

        if self.block == 0 {
            return;
        }

        for (range, chunk) in zip(self.ranges(offset), values.chunks(self.block)) {
            data[range].copy_from_slice(chunk);
        }
    }
}

/// Row-major pixel tile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile<S> {
    extent: Extent,
    data: Vec<S>,
}

impl<S: Copy + Default> Tile<S> {
    pub fn new(extent: Extent) -> Self {
        Self {
            extent,
            data: vec![S::default(); extent.volume()],
        }
    }

    pub fn from_vec(extent: Extent, data: Vec<S>) -> Self {
        assert_eq!(extent.volume(), data.len(), "tile buffer does not match its extent");
        Self { extent, data }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn width(&self) -> usize {
        self.extent.width
    }

    pub fn height(&self) -> usize {
        self.extent.height
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> S {
        self.data[y * self.extent.width + x]
    }

    #[inline(always)]
    pub fn set(&mut self, x: usize, y: usize, value: S) {
        self.data[y * self.extent.width + x] = value;
    }

    pub fn row(&self, y: usize) -> &[S] {
        let w = self.extent.width;
        &self.data[y * w..(y + 1) * w]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [S] {
        let w = self.extent.width;
        &mut self.data[y * w..(y + 1) * w]
    }

    pub fn as_slice(&self) -> &[S] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [S] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<S> {
        self.data
    }

    /// Border region of this tile needed by the neighbor in direction `dir`, as an offset into
    /// the tile buffer and the layout of the region: `khalf` rows for vertical neighbors,
    /// `khalf` columns for horizontal ones, and a `khalf x khalf` block for diagonal ones.
    pub fn border_region(&self, dir: Direction, khalf: usize) -> (usize, StridedLayout) {
        let Extent { width: w, height: h } = self.extent;
        let (dx, dy) = dir.offset();
        assert!(dx == 0 || khalf <= w, "tile too narrow for a border of {}", khalf);
        assert!(dy == 0 || khalf <= h, "tile too short for a border of {}", khalf);

        // first element of the region: last `khalf` rows/columns for positive offsets
        let row = if dy > 0 { h - khalf } else { 0 };
        let col = if dx > 0 { w - khalf } else { 0 };
        let offset = row * w + col;

        let layout = match (dx, dy) {
            (0, _) => StridedLayout::contiguous(w * khalf),
            (_, 0) => StridedLayout::new(h, khalf, w),
            _ => StridedLayout::new(khalf, khalf, w),
        };

        (offset, layout)
    }
}

/// The four halo strips around a tile.
///
/// `up` and `down` hold `khalf` rows of `width` pixels. `left` and `right` hold
/// `height + 2 * khalf` rows of `khalf` pixels: the middle `height` rows hold the neighboring
/// columns, the first and last `khalf` rows hold the diagonal corner blocks. Diagonal reads
/// during convolution therefore always go through the `left`/`right` strips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HaloBuffers<S> {
    tile: Extent,
    khalf: usize,
    up: Vec<S>,
    down: Vec<S>,
    left: Vec<S>,
    right: Vec<S>,
}

impl<S: Copy + Default> HaloBuffers<S> {
    pub fn new(tile: Extent, khalf: usize) -> Self {
        let vertical = tile.width * khalf;
        let horizontal = (tile.height + 2 * khalf) * khalf;

        Self {
            tile,
            khalf,
            up: vec![S::default(); vertical],
            down: vec![S::default(); vertical],
            left: vec![S::default(); horizontal],
            right: vec![S::default(); horizontal],
        }
    }

    pub fn khalf(&self) -> usize {
        self.khalf
    }

    pub fn tile_extent(&self) -> Extent {
        self.tile
    }

    fn slot_range(&self, dir: Direction) -> (HaloSide, Range<usize>) {
        let k = self.khalf;
        let h = self.tile.height;
        let corner = k * k;

        match dir {
            Direction::Up => (HaloSide::Up, 0..self.up.len()),
            Direction::Down => (HaloSide::Down, 0..self.down.len()),
            Direction::Left => (HaloSide::Left, corner..corner + h * k),
            Direction::Right => (HaloSide::Right, corner..corner + h * k),
            Direction::UpLeft => (HaloSide::Left, 0..corner),
            Direction::DownLeft => (HaloSide::Left, (h + k) * k..(h + 2 * k) * k),
            Direction::UpRight => (HaloSide::Right, 0..corner),
            Direction::DownRight => (HaloSide::Right, (h + k) * k..(h + 2 * k) * k),
        }
    }

    /// Region that receives the border of the neighbor in direction `dir`.
    pub fn slot(&self, dir: Direction) -> &[S] {
        let (side, range) = self.slot_range(dir);
        &self.side(side)[range]
    }

    pub fn slot_mut(&mut self, dir: Direction) -> &mut [S] {
        let (side, range) = self.slot_range(dir);
        &mut self.side_mut(side)[range]
    }

    /// All eight slots at once, for receiving into them concurrently.
    pub fn slots_mut(&mut self) -> Vec<(Direction, &mut [S])> {
        let corner = self.khalf * self.khalf;
        let side = self.tile.height * self.khalf;

        let (up_left, rest) = self.left.split_at_mut(corner);
        let (left, down_left) = rest.split_at_mut(side);
        let (up_right, rest) = self.right.split_at_mut(corner);
        let (right, down_right) = rest.split_at_mut(side);

        vec![
            (Direction::Up, &mut self.up[..]),
            (Direction::Down, &mut self.down[..]),
            (Direction::Left, left),
            (Direction::Right, right),
            (Direction::UpLeft, up_left),
            (Direction::UpRight, up_right),
            (Direction::DownLeft, down_left),
            (Direction::DownRight, down_right),
        ]
    }

    fn side(&self, side: HaloSide) -> &[S] {
        match side {
            HaloSide::Up => &self.up,
            HaloSide::Down => &self.down,
            HaloSide::Left => &self.left,
            HaloSide::Right => &self.right,
        }
    }

    fn side_mut(&mut self, side: HaloSide) -> &mut [S] {
        match side {
            HaloSide::Up => &mut self.up,
            HaloSide::Down => &mut self.down,
            HaloSide::Left => &mut self.left,
            HaloSide::Right => &mut self.right,
        }
    }

    // The accessors below take tile-local coordinates of a pixel outside the tile.

    /// `y` in `[-khalf, 0)`, `x` in `[0, width)`.
    #[inline(always)]
    pub fn up(&self, x: isize, y: isize) -> S {
        let row = (self.khalf as isize + y) as usize;
        self.up[row * self.tile.width + x as usize]
    }

    /// `y` in `[height, height + khalf)`, `x` in `[0, width)`.
    #[inline(always)]
    pub fn down(&self, x: isize, y: isize) -> S {
        let row = (y - self.tile.height as isize) as usize;
        self.down[row * self.tile.width + x as usize]
    }

    /// `x` in `[-khalf, 0)`, `y` in `[-khalf, height + khalf)`.
    #[inline(always)]
    pub fn left(&self, x: isize, y: isize) -> S {
        let k = self.khalf as isize;
        let col = (x + k) as usize;
        let row = (y + k) as usize;
        self.left[row * self.khalf + col]
    }

    /// `x` in `[width, width + khalf)`, `y` in `[-khalf, height + khalf)`.
    #[inline(always)]
    pub fn right(&self, x: isize, y: isize) -> S {
        let k = self.khalf as isize;
        let col = (x - self.tile.width as isize) as usize;
        let row = (y + k) as usize;
        self.right[row * self.khalf + col]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum HaloSide {
    Up,
    Down,
    Left,
    Right,
}
