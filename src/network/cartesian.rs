use mpi::datatype::{MutView, PartitionMut, UserDatatype, View};
use mpi::ffi;
use mpi::raw::{AsRaw, FromRaw};
use mpi::topology::{CartesianCommunicator, Rank, SimpleCommunicator};
use mpi::traits::*;
use mpi::Count;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::mem::{size_of, MaybeUninit};
use std::os::raw::{c_char, c_int};

use super::{GatherGroup, GatherTarget, Incoming, NetworkError, Outgoing, Pixel, Transport};
use crate::prelude::*;
use crate::types::{GridPos, GridShape, StridedLayout, Topology, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiError(c_int);

impl MpiError {
    fn new(code: c_int) -> Result<(), MpiError> {
        if code == ffi::MPI_SUCCESS as c_int {
            Ok(())
        } else {
            Err(Self(code))
        }
    }

    fn message(&self) -> String {
        let mut buffer = vec![0u8; ffi::MPI_MAX_ERROR_STRING as usize];
        let mut n: c_int = 0;

        let code =
            unsafe { ffi::MPI_Error_string(self.0, buffer.as_mut_ptr() as *mut c_char, &mut n) };

        if code == ffi::MPI_SUCCESS as c_int {
            buffer.truncate(n as usize);
            String::from_utf8_lossy(&buffer).into_owned()
        } else {
            format!("error code {}", self.0)
        }
    }
}

impl StdError for MpiError {}

impl Display for MpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MPI error: {}", self.message())
    }
}

#[inline(always)]
fn mpi_check(code: c_int) -> Result<(), MpiError> {
    MpiError::new(code)
}

fn rank(id: WorkerId) -> Rank {
    id.get() as Rank
}

fn to_count(n: usize) -> Result<Count, NetworkError> {
    Count::try_from(n).map_err(|_| NetworkError::TooLarge(n))
}

/// Grid shape chosen by `MPI_Dims_create`, the larger dimension along `x`.
fn dims_create(num_workers: usize) -> Result<GridShape, NetworkError> {
    let mut dims: [c_int; 2] = [0, 0];
    mpi_check(unsafe { ffi::MPI_Dims_create(to_count(num_workers)?, 2, dims.as_mut_ptr()) })?;

    Ok(GridShape {
        cols: dims[0] as usize,
        rows: dims[1] as usize,
    })
}

fn vector_datatype<S: Pixel>(layout: StridedLayout) -> Result<UserDatatype, NetworkError> {
    Ok(UserDatatype::vector(
        to_count(layout.count)?,
        to_count(layout.block)?,
        to_count(layout.stride)?,
        &S::equivalent_datatype(),
    ))
}

/// Vector datatype with the extent of a single element, so gather displacements count
/// elements instead of whole regions.
fn element_extent_datatype<S: Pixel>(layout: StridedLayout) -> Result<UserDatatype, NetworkError> {
    let vector = vector_datatype::<S>(layout)?;
    let mut resized = MaybeUninit::<ffi::MPI_Datatype>::uninit();

    unsafe {
        mpi_check(ffi::MPI_Type_create_resized(
            vector.as_raw(),
            0,
            size_of::<S>() as ffi::MPI_Aint,
            resized.as_mut_ptr(),
        ))?;

        let mut resized = resized.assume_init();
        mpi_check(ffi::MPI_Type_commit(&mut resized))?;
        Ok(UserDatatype::from_raw(resized))
    }
}

/// One process of the job, placed in a non-periodic two-dimensional Cartesian grid.
///
/// Ranks of the grid communicator are row-major: dimension 0 runs over the grid rows and
/// dimension 1 over the grid columns, so rank `r` sits at column `r % cols` and row
/// `r / cols`. The runtime may reorder ranks relative to the world communicator.
pub struct MpiEndpoint {
    comm: CartesianCommunicator,
    topology: Topology,
    my_id: WorkerId,
}

impl Debug for MpiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpiEndpoint")
            .field("my_id", &self.my_id)
            .field("grid", &self.topology.grid())
            .finish()
    }
}

impl MpiEndpoint {
    pub fn connect(world: &SimpleCommunicator) -> Result<Self, NetworkError> {
        let grid = dims_create(world.size() as usize)?;
        let dims = [to_count(grid.rows)?, to_count(grid.cols)?];

        let comm = world
            .create_cartesian_communicator(&dims, &[false, false], true)
            .ok_or(NetworkError::OutsideGrid(grid))?;

        let my_id = WorkerId::new(comm.rank() as usize);
        let topology = Topology::with_grid(grid);

        let coords = comm.rank_to_coordinates(comm.rank());
        let found = GridPos::new(coords[1] as usize, coords[0] as usize);
        let expected = grid.position_of(my_id);
        if found != expected {
            return Err(NetworkError::Misplaced {
                id: my_id,
                found,
                expected,
            });
        }

        debug!("{} of {} at {} on {}", my_id, grid, found, hostname());
        Ok(Self {
            comm,
            topology,
            my_id,
        })
    }
}

impl Transport for MpiEndpoint {
    fn my_id(&self) -> WorkerId {
        self.my_id
    }

    fn topology(&self) -> Topology {
        self.topology
    }

    fn barrier(&mut self) -> Result<(), NetworkError> {
        self.comm.barrier();
        Ok(())
    }

    fn all_gather(&mut self, values: &[u64]) -> Result<Vec<u64>, NetworkError> {
        let mut out = vec![0u64; values.len() * self.num_workers()];
        self.comm.all_gather_into(values, &mut out[..]);
        Ok(out)
    }

    fn exchange<S: Pixel>(
        &mut self,
        data: &[S],
        outgoing: &[Outgoing],
        incoming: &mut [Incoming<'_, S>],
    ) -> Result<(), NetworkError> {
        let datatypes = outgoing
            .iter()
            .map(|o| vector_datatype::<S>(o.layout))
            .collect::<Result<Vec<_>, _>>()?;

        let views = zip(outgoing, &datatypes)
            .map(|(o, datatype)| {
                assert!(
                    o.offset + o.layout.span() <= data.len(),
                    "strided region out of bounds"
                );

                // the datatype selects exactly the region checked above
                unsafe { View::with_count_and_datatype(&data[o.offset..], 1, datatype) }
            })
            .collect_vec();

        let comm = &self.comm;
        mpi::request::scope(|scope| {
            let requests = zip(outgoing, &views)
                .map(|(o, view)| {
                    trace!("sending {} elements to {} (tag {})", o.layout.len(), o.dst, o.tag);
                    comm.process_at_rank(rank(o.dst))
                        .immediate_send_with_tag(scope, view, o.tag.0)
                })
                .collect_vec();

            let mut result = Ok(());
            for slot in incoming.iter_mut() {
                let status = comm
                    .process_at_rank(rank(slot.src))
                    .receive_into_with_tag(&mut *slot.buffer, slot.tag.0);

                let found = status.count(S::equivalent_datatype()) as usize;
                if found != slot.buffer.len() && result.is_ok() {
                    result = Err(NetworkError::SizeMismatch {
                        source_id: slot.src,
                        expected: slot.buffer.len(),
                        found,
                    });
                }
            }

            for request in requests {
                request.wait_without_status();
            }

            result
        })
    }

    fn gather_into<S: Pixel>(
        &mut self,
        group: &GatherGroup,
        data: &[S],
        target: Option<GatherTarget<'_, S>>,
    ) -> Result<(), NetworkError> {
        let me = self.my_id;
        let participants = group.participants();
        let ranks = participants.iter().map(|&id| rank(id)).collect_vec();

        // collective over the whole grid; only participants obtain a communicator
        let subgroup = self.comm.group().include(&ranks);
        let sub = match self.comm.split_by_subgroup_collective(&subgroup) {
            Some(sub) => sub,
            None => return Ok(()),
        };

        // participants are listed root first, so the root has rank 0 in `sub`
        let root = sub.process_at_rank(0);
        let contribution: &[S] = if group.contains(me) { data } else { &[] };

        if me != group.root {
            root.gather_varcount_into(contribution);
            return Ok(());
        }

        let mut target = target.ok_or(NetworkError::MissingTarget)?;
        let counts = participants
            .iter()
            .map(|&id| group.contains(id) as Count)
            .collect_vec();
        let displs = participants
            .iter()
            .map(|&id| to_count(target.displacement_of(group, id).unwrap_or(0)))
            .collect::<Result<Vec<_>, _>>()?;

        for &d in target.displacements {
            assert!(
                d + target.layout.span() <= target.buffer.len(),
                "gather target out of bounds"
            );
        }

        let datatype = element_extent_datatype::<S>(target.layout)?;

        // every displacement was checked against the buffer above
        let mut view =
            unsafe { MutView::with_count_and_datatype(&mut target.buffer[..], 1, &datatype) };
        let mut partition = PartitionMut::new(&mut view, counts, displs);
        root.gather_varcount_into_root(contribution, &mut partition);

        Ok(())
    }

    fn abort(&self, reason: &str) {
        error!("{} aborts the computation: {}", self.my_id, reason);
        self.comm.abort(1)
    }
}
