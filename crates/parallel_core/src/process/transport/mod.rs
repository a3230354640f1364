//! Collective-communication transports.
//!
//! A transport is one process's endpoint into a group of cooperating
//! participants. Implementations:
//! - `SoloTransport`: the group of one, used when no multi-process transport exists
//! - `LocalTransport`: in-process participants on separate threads, for tests
//!   and single-node runs
//! - `MpiTransport` (feature `mpi`): MPI_COMM_WORLD
//!
//! Transports are not responsible for fragmentation. `ProcessGroup` never passes
//! a buffer longer than [`Transport::max_message_len`].

use anyhow::Result;
use std::sync::Arc;

mod local;
#[cfg(feature = "mpi")]
mod mpi_world;

pub use local::{LocalCluster, LocalTransport};
#[cfg(feature = "mpi")]
pub use mpi_world::MpiTransport;

/// Element-count ceiling of transports that address counts with a signed 32-bit
/// integer, with a little headroom below `i32::MAX`.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = i32::MAX as usize - 2;

/// Threading guarantee offered by a transport, weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadSupport {
    /// Only one thread may exist in the process.
    Single,
    /// Many threads may run, only the controlling thread issues collectives.
    Funneled,
    /// Any thread may issue collectives, one at a time.
    Serialized,
    /// Any thread, concurrently.
    Multiple,
}

/// Endpoint of one participant in a collective group.
///
/// Every participant must issue the same collectives in the same order with
/// buffers of the same length. A participant that skips a call blocks the rest
/// of the group forever.
pub trait Transport: Send + Sync {
    /// Zero-based rank of this participant.
    fn rank(&self) -> usize;

    /// Number of participants.
    fn size(&self) -> usize;

    fn thread_support(&self) -> ThreadSupport;

    /// Largest number of elements a single collective call may carry.
    fn max_message_len(&self) -> usize {
        DEFAULT_MAX_MESSAGE_LEN
    }

    /// Returns once every participant has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Element-wise sum across participants, stored in every participant's `data`.
    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<()>;

    /// Element-wise sum across participants, stored in rank 0's `data`.
    ///
    /// Non-root buffers are left in an unspecified state.
    fn reduce_sum_to_root(&self, data: &mut [f64]) -> Result<()>;

    /// Releases transport resources. Called at most once.
    fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

/// Lets callers keep a handle on an endpoint owned by a `ProcessGroup`.
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn thread_support(&self) -> ThreadSupport {
        (**self).thread_support()
    }

    fn max_message_len(&self) -> usize {
        (**self).max_message_len()
    }

    fn barrier(&self) -> Result<()> {
        (**self).barrier()
    }

    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<()> {
        (**self).all_reduce_sum(data)
    }

    fn reduce_sum_to_root(&self, data: &mut [f64]) -> Result<()> {
        (**self).reduce_sum_to_root(data)
    }

    fn finalize(&self) -> Result<()> {
        (**self).finalize()
    }
}

/// Transport for a process running on its own.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoloTransport;

impl Transport for SoloTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn thread_support(&self) -> ThreadSupport {
        ThreadSupport::Multiple
    }

    fn max_message_len(&self) -> usize {
        usize::MAX
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn all_reduce_sum(&self, _data: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn reduce_sum_to_root(&self, _data: &mut [f64]) -> Result<()> {
        Ok(())
    }
}
