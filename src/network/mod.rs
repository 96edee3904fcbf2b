//! Message passing between the worker processes of one MPI job.
//!
//! The pipeline talks to its peers through the [`Transport`] trait. [`MpiEndpoint`] implements
//! it on top of a two-dimensional Cartesian communicator; strided regions travel as MPI vector
//! datatypes straight out of (and into) the tile buffers.
use mpi::datatype::Equivalence;
use std::fmt::{self, Display};

use crate::prelude::*;
use crate::types::{GridPos, GridShape, Sample, StridedLayout, Topology, WorkerId};

mod cartesian;
#[cfg(test)]
mod local;

pub use self::cartesian::{MpiEndpoint, MpiError};
#[cfg(test)]
pub(crate) use self::local::{run_workers, LocalEndpoint};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub i32);

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Sample types that can travel in MPI messages.
pub trait Pixel: Sample + Equivalence {}

impl<T: Sample + Equivalence> Pixel for T {}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("MPI has already been initialized in this process")]
    AlreadyInitialized,

    #[error("{0}")]
    Mpi(#[from] MpiError),

    #[error("the runtime placed {id} at {found}, expected {expected}")]
    Misplaced {
        id: WorkerId,
        found: GridPos,
        expected: GridPos,
    },

    #[error("expected a message of {expected} elements from {source_id}, received {found}")]
    SizeMismatch {
        source_id: WorkerId,
        expected: usize,
        found: usize,
    },

    #[error("this process is not part of the {0} grid")]
    OutsideGrid(GridShape),

    #[error("message of {0} elements exceeds the maximum message size")]
    TooLarge(usize),

    #[error("the root of a gather must provide a target buffer")]
    MissingTarget,

    #[cfg(test)]
    #[error("computation aborted by {id}: {reason}")]
    Aborted { id: WorkerId, reason: String },

    #[cfg(test)]
    #[error("connection was closed")]
    Disconnected,
}

/// A strided region of the local buffer, destined for `dst`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub dst: WorkerId,
    pub tag: Tag,
    pub offset: usize,
    pub layout: StridedLayout,
}

/// A contiguous buffer that must be filled completely by one message from `src`.
#[derive(Debug)]
pub struct Incoming<'a, S> {
    pub src: WorkerId,
    pub tag: Tag,
    pub buffer: &'a mut [S],
}

/// Participants of one grouped gather. The root always takes part but only contributes data
/// if it is listed as a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherGroup {
    pub root: WorkerId,
    pub members: Vec<WorkerId>,
}

impl GatherGroup {
    pub fn contains(&self, id: WorkerId) -> bool {
        self.members.contains(&id)
    }

    /// Every participant, root first.
    pub fn participants(&self) -> Vec<WorkerId> {
        let mut out = vec![self.root];
        out.extend(self.members.iter().copied().filter(|&m| m != self.root));
        out
    }
}

/// Where the root of a grouped gather places the contribution of each member: member `i` is
/// written through `layout` at offset `displacements[i]` of `buffer`.
#[derive(Debug)]
pub struct GatherTarget<'a, T> {
    pub buffer: &'a mut [T],
    pub layout: StridedLayout,
    pub displacements: &'a [usize],
}

impl<T> GatherTarget<'_, T> {
    /// Displacement of `id` within the target, `None` if it does not contribute.
    fn displacement_of(&self, group: &GatherGroup, id: WorkerId) -> Option<usize> {
        group
            .members
            .iter()
            .position(|&m| m == id)
            .map(|i| self.displacements[i])
    }
}

/// Communication primitives needed by one worker.
pub trait Transport {
    fn my_id(&self) -> WorkerId;

    /// The process grid chosen by the runtime.
    fn topology(&self) -> Topology;

    fn num_workers(&self) -> usize {
        self.topology().num_workers()
    }

    /// Blocks until every worker has entered the barrier.
    fn barrier(&mut self) -> Result<(), NetworkError>;

    /// Every worker contributes `values`, which must have the same length everywhere, and
    /// obtains the contributions of all workers concatenated in worker order.
    fn all_gather(&mut self, values: &[u64]) -> Result<Vec<u64>, NetworkError>;

    /// Sends every region in `outgoing` out of `data` and fills every buffer in `incoming`.
    /// Returns once all transfers have completed.
    fn exchange<S: Pixel>(
        &mut self,
        data: &[S],
        outgoing: &[Outgoing],
        incoming: &mut [Incoming<'_, S>],
    ) -> Result<(), NetworkError>;

    /// Grouped gather. Must be called by every worker, in the same order of groups
    /// everywhere; workers outside `group` return right away. Every member contributes
    /// `data` and the root places the contributions into its `target`, which only the root
    /// provides.
    fn gather_into<S: Pixel>(
        &mut self,
        group: &GatherGroup,
        data: &[S],
        target: Option<GatherTarget<'_, S>>,
    ) -> Result<(), NetworkError>;

    /// Tears down the computation of every worker.
    fn abort(&self, reason: &str);
}
