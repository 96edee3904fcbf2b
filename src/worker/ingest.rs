use std::io::Read;

use super::WorkerContext;
use crate::network::{Pixel, Transport};
use crate::prelude::*;
use crate::types::{GridPos, Tile};

/// Reads the tile of this worker from `source`, its private reader of the raster.
///
/// Every worker walks the whole raster in row-major run order (grid rows, image rows within
/// the grid row, grid columns), keeps the runs it owns and skips over the rest. All workers
/// meet at a barrier after every run, so they advance through the image in lockstep.
pub(super) fn ingest<S: Pixel, T: Transport>(
    ctx: &WorkerContext,
    transport: &mut T,
    source: &mut dyn Read,
) -> Result<Tile<S>> {
    let grid = ctx.grid();
    let sample_size = S::DEPTH.size_in_bytes();
    let mut tile = Tile::new(ctx.layout.extent);
    let mut run = vec![];

    for grid_row in 0..grid.rows {
        let height = ctx.table.extent_of(grid.worker_at(GridPos::new(0, grid_row))).height;

        for y in 0..height {
            for grid_col in 0..grid.cols {
                let owner = grid.worker_at(GridPos::new(grid_col, grid_row));
                run.resize(ctx.table.extent_of(owner).width * sample_size, 0);

                source.read_exact(&mut run).with_context(|| {
                    format!(
                        "short read in row {} of the tile of {} ({} bytes expected)",
                        y,
                        owner,
                        run.len()
                    )
                })?;

                if owner == ctx.id {
                    trace!("{} keeps row {} of its tile", ctx.id, y);
                    S::decode_into(&run, tile.row_mut(y));
                }

                transport.barrier()?;
            }
        }
    }

    Ok(tile)
}
