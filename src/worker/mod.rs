//! The per-worker pipeline: context setup, ingestion, halo exchange, convolution and assembly.
use std::io::Read;
use std::time::{Duration, Instant};

use crate::network::{Pixel, Transport};
use crate::prelude::*;
use crate::types::{
    check_partition, ConfigError, Extent, GridPos, GridShape, Kernel, Neighbors, PartitionTable,
    TileLayout, TileRecord, Topology, WorkerId,
};
use haloblur_core::convolve::{convolve, convolve_parallel};

mod assembly;
mod halo;
mod ingest;

const HALO_TAG_BASE: i32 = 16;

/// Everything a worker knows about its place in the computation. Built once, before any
/// pixel is moved, and never changed afterwards.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub(crate) id: WorkerId,
    pub(crate) topology: Topology,
    pub(crate) pos: GridPos,
    pub(crate) neighbors: Neighbors,
    pub(crate) layout: TileLayout,
    pub(crate) table: PartitionTable,
    pub(crate) kernel: Kernel,
}

impl WorkerContext {
    /// Computes the context of worker `id` locally. The partition table is the locally
    /// computed one; see [`WorkerContext::establish`] for the exchanged version.
    pub(crate) fn new(id: WorkerId, topology: Topology, image: Extent, kernel: Kernel) -> Result<Self> {
        let grid = topology.grid();
        check_partition(image, grid, kernel.half()).map_err(ConfigError::from)?;

        let pos = topology.position_of(id)?;
        Ok(Self {
            id,
            topology,
            pos,
            neighbors: topology.neighbors_of(id)?,
            layout: TileLayout::compute(image, grid, pos),
            table: PartitionTable::compute(image, grid),
            kernel,
        })
    }

    /// Builds the context and replaces its partition table by the records announced by all
    /// workers. Every announced record must agree with the local computation.
    pub(crate) fn establish<T: Transport>(transport: &mut T, image: Extent, kernel: Kernel) -> Result<Self> {
        let mut ctx = Self::new(transport.my_id(), transport.topology(), image, kernel)?;

        let words = transport
            .all_gather(&ctx.layout.record().to_words())
            .context("failed to exchange the partition table")?;
        let records = words
            .chunks_exact(3)
            .map(|w| TileRecord::from_words([w[0], w[1], w[2]]))
            .collect_vec();

        let table = PartitionTable::from_records(&records);
        table.verify(&ctx.table)?;

        ctx.table = table;
        Ok(ctx)
    }

    pub(crate) fn grid(&self) -> GridShape {
        self.topology.grid()
    }

    pub(crate) fn image(&self) -> Extent {
        self.layout.image
    }

    pub(crate) fn khalf(&self) -> usize {
        self.kernel.half()
    }
}

/// Wall-clock duration of every phase of one worker.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct PhaseTimings {
    pub setup: Duration,
    pub ingest: Duration,
    pub halo: Duration,
    pub convolve: Duration,
    pub assembly: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.setup + self.ingest + self.halo + self.convolve + self.assembly
    }

    /// Microseconds per phase, in pipeline order.
    pub fn to_micros(&self) -> [u64; 5] {
        [self.setup, self.ingest, self.halo, self.convolve, self.assembly]
            .map(|d| d.as_micros() as u64)
    }

    pub fn from_micros(micros: [u64; 5]) -> Self {
        let [setup, ingest, halo, convolve, assembly] = micros.map(Duration::from_micros);
        Self {
            setup,
            ingest,
            halo,
            convolve,
            assembly,
        }
    }
}

#[derive(Debug)]
pub struct WorkerReport<S> {
    pub id: WorkerId,
    pub position: GridPos,
    pub tile: Extent,
    pub start_index: usize,
    pub timings: PhaseTimings,
    /// The assembled image, only present at the coordinator.
    pub image: Option<Vec<S>>,
}

/// Parameters shared by all workers of one run.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) image: Extent,
    pub(crate) kernel: Kernel,
    pub(crate) parallel_convolution: bool,
}

fn timed<T>(slot: &mut Duration, fun: impl FnOnce() -> Result<T>) -> Result<T> {
    let before = Instant::now();
    let result = fun();
    *slot = before.elapsed();
    result
}

/// Runs the whole pipeline for this worker. `source` is this worker's own reader of the input,
/// positioned at the first raster byte.
pub(crate) fn execute_worker<S: Pixel, T: Transport>(
    transport: &mut T,
    source: &mut dyn Read,
    job: &Job,
) -> Result<WorkerReport<S>> {
    let mut timings = PhaseTimings::default();

    let ctx = timed(&mut timings.setup, || {
        WorkerContext::establish(transport, job.image, job.kernel.clone())
    })?;
    debug!(
        "{} at {} owns {} pixels at offset {}",
        ctx.id,
        ctx.pos,
        ctx.layout.extent,
        ctx.layout.start_index()
    );

    let tile = timed(&mut timings.ingest, || ingest::ingest::<S, T>(&ctx, transport, source))
        .context("ingestion failed")?;
    debug!("{} finished ingestion", ctx.id);

    let halos = timed(&mut timings.halo, || halo::exchange_halos(&ctx, transport, &tile))
        .context("halo exchange failed")?;
    debug!("{} finished halo exchange", ctx.id);

    let blurred = timed(&mut timings.convolve, || {
        Ok(if job.parallel_convolution {
            convolve_parallel(&tile, &halos, &ctx.kernel, &ctx.layout)
        } else {
            convolve(&tile, &halos, &ctx.kernel, &ctx.layout)
        })
    })?;
    drop(halos);
    debug!("{} finished convolution", ctx.id);

    let image = timed(&mut timings.assembly, || assembly::assemble(&ctx, transport, &blurred))
        .context("assembly failed")?;
    debug!("{} finished assembly", ctx.id);

    Ok(WorkerReport {
        id: ctx.id,
        position: ctx.pos,
        tile: ctx.layout.extent,
        start_index: ctx.layout.start_index(),
        timings,
        image,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::run_workers;
    use crate::types::PartitionError;
    use haloblur_core::kernel::KernelKind;

    fn context(id: usize, num_workers: usize, image: Extent, kernel: &Kernel) -> Result<WorkerContext> {
        let topology = Topology::new(num_workers)?;
        WorkerContext::new(WorkerId::new(id), topology, image, kernel.clone())
    }

    #[test]
    fn test_context_is_consistent() {
        let image = Extent::new(11, 7);
        let kernel = Kernel::new(KernelKind::Box, 3, 0.0).unwrap();

        for id in 0..6 {
            let ctx = context(id, 6, image, &kernel).unwrap();
            assert_eq!(ctx.grid(), GridShape { cols: 3, rows: 2 });
            assert_eq!(ctx.table.get(ctx.id), ctx.layout.record());
            assert_eq!(ctx.khalf(), 1);
        }
    }

    #[test]
    fn test_context_rejects_degenerate_partitions() {
        let kernel = Kernel::new(KernelKind::Box, 9, 0.0).unwrap();

        // more grid columns than pixels
        let error = context(0, 4, Extent::new(1, 10), &kernel).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::Partition(PartitionError::EmptyTile { .. }))
        ));

        // tiles of 5 columns with a radius of 4 are fine, 3 columns are not
        assert!(context(0, 2, Extent::new(10, 1), &kernel).is_ok());
        assert!(context(0, 2, Extent::new(6, 1), &kernel).is_err());
    }

    #[test]
    fn test_establish_exchanges_table() {
        let image = Extent::new(9, 5);
        let kernel = Kernel::new(KernelKind::Gaussian, 3, 0.0).unwrap();

        let results = run_workers(4, move |transport| {
            Ok(WorkerContext::establish(transport, image, kernel.clone())?.table)
        });

        let expected = PartitionTable::compute(image, GridShape { cols: 2, rows: 2 });
        for result in results {
            assert_eq!(result.unwrap(), expected);
        }
    }

    #[test]
    fn test_timings_in_micros() {
        let timings = PhaseTimings {
            halo: Duration::from_micros(1500),
            assembly: Duration::from_secs(2),
            ..default()
        };

        assert_eq!(timings.to_micros(), [0, 0, 1500, 0, 2_000_000]);
        assert_eq!(PhaseTimings::from_micros(timings.to_micros()), timings);
    }
}
