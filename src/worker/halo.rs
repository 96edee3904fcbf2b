use super::{WorkerContext, HALO_TAG_BASE};
use crate::network::{Incoming, Outgoing, Pixel, Tag, Transport};
use crate::prelude::*;
use crate::types::{Direction, HaloBuffers, Tile, WorkerId};

/// Tag of the messages that fill halo slot `slot` of the receiver.
fn halo_tag(slot: Direction) -> Tag {
    Tag(HALO_TAG_BASE + slot.index() as i32)
}

/// Sends the borders of `tile` to the neighbors in `dirs` and receives their borders into the
/// matching halo slots, in one exchange.
fn exchange_phase<S: Pixel, T: Transport>(
    ctx: &WorkerContext,
    transport: &mut T,
    tile: &Tile<S>,
    halos: &mut HaloBuffers<S>,
    dirs: &[Direction],
    neighbor: impl Fn(Direction) -> Option<WorkerId>,
) -> Result {
    let khalf = ctx.khalf();

    let outgoing = dirs
        .iter()
        .filter_map(|&dir| {
            let dst = neighbor(dir)?;
            let (offset, layout) = tile.border_region(dir, khalf);
            trace!("{} sends {} elements to {} ({})", ctx.id, layout.len(), dst, dir);

            // the neighbor stores what it gets from us in the slot facing back at us
            Some(Outgoing {
                dst,
                tag: halo_tag(dir.opposite()),
                offset,
                layout,
            })
        })
        .collect_vec();

    let mut incoming = halos
        .slots_mut()
        .into_iter()
        .filter(|(dir, _)| dirs.contains(dir))
        .filter_map(|(dir, buffer)| {
            neighbor(dir).map(|src| Incoming {
                src,
                tag: halo_tag(dir),
                buffer,
            })
        })
        .collect_vec();

    transport
        .exchange(tile.as_slice(), &outgoing, &mut incoming)
        .with_context(|| format!("failed to exchange the {:?} halos", dirs))?;

    Ok(())
}

/// Fills the halo buffers of this worker from its eight neighbors and supplies the neighbors
/// with the borders of `tile`.
///
/// Edges go first, then the `khalf x khalf` corners, which end up at the head and tail of the
/// `left`/`right` strips. Slots without a neighbor stay zero.
pub(super) fn exchange_halos<S: Pixel, T: Transport>(
    ctx: &WorkerContext,
    transport: &mut T,
    tile: &Tile<S>,
) -> Result<HaloBuffers<S>> {
    let mut halos = HaloBuffers::new(tile.extent(), ctx.khalf());
    if ctx.khalf() == 0 {
        return Ok(halos);
    }

    exchange_phase(ctx, transport, tile, &mut halos, &Direction::CARDINALS, |dir| {
        ctx.neighbors.get(dir)
    })?;

    exchange_phase(ctx, transport, tile, &mut halos, &Direction::DIAGONALS, |dir| {
        let (dx, dy) = dir.offset();
        ctx.topology.worker_at_offset(ctx.pos, dx, dy)
    })?;

    Ok(halos)
}
