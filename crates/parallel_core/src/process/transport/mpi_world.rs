//! MPI transport over `MPI_COMM_WORLD`.
//!
//! Requires the `mpi` feature and an MPI installation. MPI is initialised with
//! `MPI_THREAD_FUNNELED`: worker threads may run while collectives are issued,
//! but only from the thread that owns the `ProcessGroup`.
//!
//! Reductions that write into the caller's buffer on this rank stage the input
//! in a scratch buffer owned by the transport. The scratch grows to the largest
//! fragment seen and is reused by later calls, so the extra memory is bounded
//! by one fragment rather than paid per call.

use anyhow::Result;
use mpi::collective::SystemOperation;
use mpi::environment::{self, Universe};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Threading;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ThreadSupport, Transport, DEFAULT_MAX_MESSAGE_LEN};

/// Endpoint of this process in `MPI_COMM_WORLD`.
pub struct MpiTransport {
    rank: usize,
    size: usize,
    thread_support: ThreadSupport,
    // Dropping the universe finalizes MPI; `None` when MPI is owned elsewhere
    universe: Mutex<Option<Universe>>,
    scratch: Mutex<Vec<f64>>,
}

impl MpiTransport {
    /// Initialises MPI, requesting funneled threading.
    ///
    /// If MPI was already initialised elsewhere in the process, the existing
    /// world is used as is and left for its owner to finalize. The provided
    /// threading level is recorded either way; `ProcessGroup::new` rejects
    /// anything weaker than funneled.
    pub fn initialize() -> Result<Self> {
        let (universe, provided) = match mpi::initialize_with_threading(Threading::Funneled) {
            Some((universe, provided)) => (Some(universe), provided),
            None => {
                let provided = environment::threading_support();
                tracing::info!(?provided, "MPI already initialized, joining existing world");
                (None, provided)
            }
        };

        let world = SimpleCommunicator::world();
        let rank = usize::try_from(world.rank())?;
        let size = usize::try_from(world.size())?;

        tracing::info!(rank, size, ?provided, "MPI transport ready");

        Ok(Self {
            rank,
            size,
            thread_support: thread_support(provided),
            universe: Mutex::new(universe),
            scratch: Mutex::new(Vec::new()),
        })
    }

    fn world(&self) -> SimpleCommunicator {
        SimpleCommunicator::world()
    }

    /// Copies `data` into the reusable scratch buffer and returns it.
    fn stage(&self, data: &[f64]) -> MutexGuard<'_, Vec<f64>> {
        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        scratch.clear();
        scratch.extend_from_slice(data);
        scratch
    }
}

fn thread_support(threading: Threading) -> ThreadSupport {
    match threading {
        Threading::Single => ThreadSupport::Single,
        Threading::Funneled => ThreadSupport::Funneled,
        Threading::Serialized => ThreadSupport::Serialized,
        Threading::Multiple => ThreadSupport::Multiple,
    }
}

impl Transport for MpiTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn thread_support(&self) -> ThreadSupport {
        self.thread_support
    }

    fn max_message_len(&self) -> usize {
        DEFAULT_MAX_MESSAGE_LEN
    }

    fn barrier(&self) -> Result<()> {
        self.world().barrier();
        Ok(())
    }

    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<()> {
        let send = self.stage(data);
        self.world()
            .all_reduce_into(&send[..], data, SystemOperation::sum());
        Ok(())
    }

    fn reduce_sum_to_root(&self, data: &mut [f64]) -> Result<()> {
        let world = self.world();
        let root = world.process_at_rank(0);
        if self.rank == 0 {
            let send = self.stage(data);
            root.reduce_into_root(&send[..], data, SystemOperation::sum());
        } else {
            // Non-root ranks only send, straight from the caller's buffer
            root.reduce_into(&data[..], SystemOperation::sum());
        }
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let universe = self
            .universe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if universe.is_some() {
            tracing::info!(rank = self.rank, "finalizing MPI");
        }
        drop(universe);
        Ok(())
    }
}
