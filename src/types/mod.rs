//! Common types used throughout the blur pipeline.
mod config;

pub use haloblur_core::accessor::{HaloBuffers, StridedLayout, Tile};
pub use haloblur_core::kernel::{Kernel, KernelError, KernelKind};
pub use haloblur_core::partition::{
    check_partition, PartitionError, PartitionTable, TileLayout, TileRecord,
};
pub use haloblur_core::sample::{Sample, SampleDepth};
pub use haloblur_core::topology::{Neighbors, Topology, TopologyError};
pub use haloblur_core::*;

pub use self::config::*;
