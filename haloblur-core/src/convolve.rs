//! Halo-aware convolution of a single tile.
//!
//! For every output pixel and every kernel tap the source pixel is resolved as follows:
//!
//! 1. taps whose *global* position falls outside the image are skipped. They contribute
//!    nothing and the normalization is not adjusted.
//! 2. taps inside the local tile read the tile itself.
//! 3. otherwise the tap lies in exactly one halo strip: `right` if it passed the right edge,
//!    else `left` if it passed the left edge, else `up`/`down`. Diagonal taps end up in the
//!    corner-extended `left`/`right` strips.
use crate::accessor::{HaloBuffers, Tile};
use crate::kernel::Kernel;
use crate::partition::TileLayout;
use crate::sample::Sample;
use crate::Extent;
use rayon::prelude::*;

#[inline(always)]
fn source_sample<S: Sample>(tile: &Tile<S>, halos: &HaloBuffers<S>, x: isize, y: isize) -> S {
    let w = tile.width() as isize;
    let h = tile.height() as isize;

    if x >= 0 && y >= 0 && x < w && y < h {
        tile.get(x as usize, y as usize)
    } else if x >= w {
        halos.right(x, y)
    } else if x < 0 {
        halos.left(x, y)
    } else if y < 0 {
        halos.up(x, y)
    } else {
        halos.down(x, y)
    }
}

fn convolve_row<S: Sample>(
    tile: &Tile<S>,
    halos: &HaloBuffers<S>,
    kernel: &Kernel,
    layout: &TileLayout,
    y: usize,
    output: &mut [S],
) {
    let khalf = kernel.half() as isize;
    let norm = kernel.norm() as f64;
    let image = layout.image;
    let gy = (layout.start_y + y) as isize;
    let y = y as isize;

    for (x, out) in output.iter_mut().enumerate() {
        let gx = (layout.start_x + x) as isize;
        let x = x as isize;
        let mut sum = 0.0f64;

        for ky in -khalf..=khalf {
            for kx in -khalf..=khalf {
                if !image.contains(gx + kx, gy + ky) {
                    continue;
                }

                let value = source_sample(tile, halos, x + kx, y + ky);
                sum += kernel.weight(kx, ky) as f64 * value.to_f64();
            }
        }

        *out = S::from_f64_rounded(sum / norm);
    }
}

fn check_shapes<S: Sample>(tile: &Tile<S>, halos: &HaloBuffers<S>, kernel: &Kernel, layout: &TileLayout) {
    assert_eq!(tile.extent(), layout.extent, "tile does not match its layout");
    assert_eq!(halos.tile_extent(), layout.extent, "halos do not match the tile");
    assert_eq!(halos.khalf(), kernel.half(), "halo depth does not match the kernel");
}

/// Convolves `tile`, placed in the image according to `layout`, with `kernel`. Pixels outside
/// the tile are taken from `halos`.
pub fn convolve<S: Sample>(
    tile: &Tile<S>,
    halos: &HaloBuffers<S>,
    kernel: &Kernel,
    layout: &TileLayout,
) -> Tile<S> {
    check_shapes(tile, halos, kernel, layout);
    let mut output = Tile::new(tile.extent());

    for y in 0..tile.height() {
        convolve_row(tile, halos, kernel, layout, y, output.row_mut(y));
    }

    output
}

/// Same as [`convolve`], rows are distributed over the rayon thread pool.
pub fn convolve_parallel<S: Sample>(
    tile: &Tile<S>,
    halos: &HaloBuffers<S>,
    kernel: &Kernel,
    layout: &TileLayout,
) -> Tile<S> {
    check_shapes(tile, halos, kernel, layout);
    let mut output = Tile::new(tile.extent());
    let width = tile.width();

    if width > 0 {
        output
            .as_mut_slice()
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| convolve_row(tile, halos, kernel, layout, y, row));
    }

    output
}

/// Convolves a whole image held by a single owner. Every out-of-tile tap is also out of the
/// image, so the halos are never read.
pub fn convolve_image<S: Sample>(image: &[S], extent: Extent, kernel: &Kernel) -> Vec<S> {
    let tile = Tile::from_vec(extent, image.to_vec());
    let halos = HaloBuffers::new(extent, kernel.half());
    let layout = TileLayout {
        extent,
        start_x: 0,
        start_y: 0,
        image: extent,
    };

    convolve(&tile, &halos, kernel, &layout).into_vec()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kernel::KernelKind;
    use crate::partition::PartitionTable;
    use crate::{Direction, GridShape, WorkerId};
    use rand::prelude::*;

    /// Direct evaluation of the skip rule on the full image.
    fn reference<S: Sample>(image: &[S], extent: Extent, kernel: &Kernel) -> Vec<S> {
        let k = kernel.half() as isize;
        let mut out = vec![S::default(); image.len()];

        for y in 0..extent.height as isize {
            for x in 0..extent.width as isize {
                let mut sum = 0.0;
                for ky in -k..=k {
                    for kx in -k..=k {
                        if extent.contains(x + kx, y + ky) {
                            let i = (y + ky) as usize * extent.width + (x + kx) as usize;
                            sum += kernel.weight(kx, ky) as f64 * image[i].to_f64();
                        }
                    }
                }
                out[y as usize * extent.width + x as usize] =
                    S::from_f64_rounded(sum / kernel.norm() as f64);
            }
        }

        out
    }

    /// Builds the tile and halos of `worker` straight from the full image, without any
    /// message passing.
    fn local_view(
        image: &[u16],
        extent: Extent,
        grid: GridShape,
        worker: WorkerId,
        khalf: usize,
    ) -> (Tile<u16>, HaloBuffers<u16>, TileLayout) {
        let layout = TileLayout::compute(extent, grid, grid.position_of(worker));
        let Extent { width: w, height: h } = layout.extent;
        let pixel = |x: isize, y: isize| {
            let gx = layout.start_x as isize + x;
            let gy = layout.start_y as isize + y;
            if extent.contains(gx, gy) {
                image[gy as usize * extent.width + gx as usize]
            } else {
                0
            }
        };

        let mut tile = Tile::new(layout.extent);
        for y in 0..h {
            for x in 0..w {
                tile.set(x, y, pixel(x as isize, y as isize));
            }
        }

        let k = khalf as isize;
        let (w, h) = (w as isize, h as isize);
        let mut halos = HaloBuffers::new(layout.extent, khalf);
        let fill = |halos: &mut HaloBuffers<u16>, dir, xs: std::ops::Range<isize>, ys: std::ops::Range<isize>| {
            let values = ys
                .flat_map(|y| xs.clone().map(move |x| (x, y)))
                .map(|(x, y)| pixel(x, y))
                .collect::<Vec<_>>();
            halos.slot_mut(dir).copy_from_slice(&values);
        };

        fill(&mut halos, Direction::Up, 0..w, -k..0);
        fill(&mut halos, Direction::Down, 0..w, h..h + k);
        fill(&mut halos, Direction::Left, -k..0, 0..h);
        fill(&mut halos, Direction::Right, w..w + k, 0..h);
        fill(&mut halos, Direction::UpLeft, -k..0, -k..0);
        fill(&mut halos, Direction::UpRight, w..w + k, -k..0);
        fill(&mut halos, Direction::DownLeft, -k..0, h..h + k);
        fill(&mut halos, Direction::DownRight, w..w + k, h..h + k);

        (tile, halos, layout)
    }

    #[test]
    fn test_box_blur_small() {
        // 1 2 3
        // 4 5 6
        // 7 8 9
        let image: Vec<u8> = (1..=9).collect();
        let kernel = Kernel::new(KernelKind::Box, 3, 0.0).unwrap();
        let out = convolve_image(&image, Extent::new(3, 3), &kernel);

        // center sees everything: 45 / 9
        assert_eq!(out[4], 5);
        // corner sees 1 + 2 + 4 + 5 = 12, still divided by 9
        assert_eq!(out[0], 1);
        // bottom-right sees 5 + 6 + 8 + 9 = 28 -> 3.11
        assert_eq!(out[8], 3);
        // top edge sees 1+2+3+4+5+6 = 21 -> 2.33
        assert_eq!(out[1], 2);
    }

    #[test]
    fn test_edges_are_not_renormalized() {
        let extent = Extent::new(6, 5);
        let image = vec![200u8; extent.volume()];
        let kernel = Kernel::new(KernelKind::Box, 3, 0.0).unwrap();
        let out = convolve_image(&image, extent, &kernel);

        // corner: 4 of 9 taps inside the image
        assert_eq!(out[0], (200.0f64 * 4.0 / 9.0).round() as u8);
        // edge: 6 of 9 taps
        assert_eq!(out[2], (200.0f64 * 6.0 / 9.0).round() as u8);
        // interior keeps its value
        assert_eq!(out[extent.width + 2], 200);
    }

    #[test]
    fn test_identity_kernel() {
        let mut rng = SmallRng::seed_from_u64(1);
        let extent = Extent::new(13, 7);
        let image: Vec<u16> = (0..extent.volume()).map(|_| rng.gen()).collect();

        for &kind in &[KernelKind::Box, KernelKind::Weighted, KernelKind::Gaussian] {
            let kernel = Kernel::new(kind, 1, 0.3).unwrap();
            assert_eq!(convolve_image(&image, extent, &kernel), image);
        }
    }

    #[test]
    fn test_whole_image_matches_reference() {
        let mut rng = SmallRng::seed_from_u64(2);
        let extent = Extent::new(17, 11);
        let image: Vec<u16> = (0..extent.volume()).map(|_| rng.gen()).collect();

        for &(kind, size) in &[
            (KernelKind::Box, 3),
            (KernelKind::Weighted, 5),
            (KernelKind::Gaussian, 7),
        ] {
            let kernel = Kernel::new(kind, size, 0.2).unwrap();
            assert_eq!(
                convolve_image(&image, extent, &kernel),
                reference(&image, extent, &kernel)
            );
        }
    }

    #[test]
    fn test_tiles_with_halos_match_reference() {
        let mut rng = SmallRng::seed_from_u64(3);
        let extent = Extent::new(23, 19);
        let image: Vec<u16> = (0..extent.volume()).map(|_| rng.gen_range(0..4096)).collect();

        for &(cols, rows, size) in &[(2, 2, 3), (3, 2, 5), (4, 3, 5), (3, 3, 7)] {
            let grid = GridShape { cols, rows };
            let kernel = Kernel::new(KernelKind::Gaussian, size, 0.0).unwrap();
            let expected = reference(&image, extent, &kernel);
            let table = PartitionTable::compute(extent, grid);

            let mut assembled = vec![0u16; extent.volume()];
            for (id, record) in table.iter() {
                let (tile, halos, layout) = local_view(&image, extent, grid, id, kernel.half());
                let sequential = convolve(&tile, &halos, &kernel, &layout);
                let parallel = convolve_parallel(&tile, &halos, &kernel, &layout);
                assert_eq!(sequential, parallel);

                for y in 0..record.height {
                    let start = record.start_index + y * extent.width;
                    assembled[start..start + record.width].copy_from_slice(sequential.row(y));
                }
            }

            assert_eq!(assembled, expected, "grid {}x{} kernel {}", cols, rows, size);
        }
    }
}
