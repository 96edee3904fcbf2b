use std::collections::BTreeMap;

use super::WorkerContext;
use crate::network::{GatherGroup, GatherTarget, Pixel, Transport};
use crate::prelude::*;
use crate::types::{Extent, PartitionTable, StridedLayout, Tile, WorkerId};

/// Shape of a tile relative to the tile of the coordinator. The coordinator owns the first
/// share along both axes, so no tile is ever larger than its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum ShapeClass {
    Equal = 0,
    NarrowerOnly = 1,
    ShorterOnly = 2,
    Both = 3,
}

impl ShapeClass {
    pub(crate) fn classify(tile: Extent, reference: Extent) -> Self {
        match (tile.width < reference.width, tile.height < reference.height) {
            (false, false) => ShapeClass::Equal,
            (true, false) => ShapeClass::NarrowerOnly,
            (false, true) => ShapeClass::ShorterOnly,
            (true, true) => ShapeClass::Both,
        }
    }
}

/// Groups all workers by shape class in a single pass. Only classes that occur are present;
/// the coordinator is always the first member of [`ShapeClass::Equal`].
pub(crate) fn shape_classes(table: &PartitionTable) -> BTreeMap<ShapeClass, Vec<WorkerId>> {
    let reference = table.extent_of(WorkerId::COORDINATOR);
    let mut classes = BTreeMap::<_, Vec<_>>::new();

    for (id, record) in table.iter() {
        classes
            .entry(ShapeClass::classify(record.extent(), reference))
            .or_default()
            .push(id);
    }

    classes
}

fn common_extent(table: &PartitionTable, class: ShapeClass, members: &[WorkerId]) -> Result<Extent> {
    let extent = table.extent_of(members[0]);

    if let Some(&other) = members.iter().find(|&&m| table.extent_of(m) != extent) {
        bail!(
            "{:?} tiles differ in shape: {} for {} but {} for {}",
            class,
            extent,
            members[0],
            table.extent_of(other),
            other
        );
    }

    Ok(extent)
}

/// Collects the blurred tiles of all workers at the coordinator, one grouped gather per shape
/// class. Every worker walks all classes in the same order, since splitting off the group of a
/// class involves the whole grid. Returns the full image at the coordinator and `None`
/// everywhere else.
pub(super) fn assemble<S: Pixel, T: Transport>(
    ctx: &WorkerContext,
    transport: &mut T,
    blurred: &Tile<S>,
) -> Result<Option<Vec<S>>> {
    let image = ctx.image();
    let root = WorkerId::COORDINATOR;
    let mut output = if ctx.id == root {
        Some(vec![S::default(); image.volume()])
    } else {
        None
    };

    for (class, members) in shape_classes(&ctx.table) {
        let extent = common_extent(&ctx.table, class, &members)?;
        let layout = StridedLayout::new(extent.height, extent.width, image.width);
        let displacements = members
            .iter()
            .map(|&m| ctx.table.start_index_of(m))
            .collect_vec();
        let group = GatherGroup { root, members };

        if group.contains(ctx.id) || ctx.id == root {
            trace!(
                "{} joins the gather of {:?} ({} members of {})",
                ctx.id,
                class,
                group.members.len(),
                extent
            );
        }

        let target = output.as_mut().map(|buffer| GatherTarget {
            buffer: buffer.as_mut_slice(),
            layout,
            displacements: &displacements,
        });

        transport
            .gather_into(&group, blurred.as_slice(), target)
            .with_context(|| format!("gather of {:?} tiles failed", class))?;
    }

    Ok(output)
}
