//! Collective reduction across cooperating processes.
//!
//! A `ProcessGroup` describes where this process sits in a group of cooperating
//! participants (its rank and the group size) and offers the collectives the
//! simulation driver needs: a barrier and element-wise sums of `f64` buffers,
//! either to everyone or to rank 0.
//!
//! # Process-wide state
//!
//! Most drivers have exactly one group per process. The free functions in this
//! module keep that group in a process-wide `OnceLock`:
//!
//! ```ignore
//! process::initialize()?;            // once, at program start
//! engine.dispatch(n, accumulate)?;   // thread-parallel phase
//! process::sum_to_root(&mut totals)?; // combine per-process partials
//! if process::is_root() { write(&totals)?; }
//! process::finalize()?;              // once, at program end
//! ```
//!
//! Before `initialize` (or without a multi-process transport) the queries answer
//! rank 0 of a group of one and the collectives do nothing.
//!
//! # Collective discipline
//!
//! Every participant must issue the same collectives in the same order with
//! buffers of the same length, from the thread that initialised the group. There
//! is no timeout: a participant that crashes or skips a call deadlocks the group.
//!
//! # Module Structure
//!
//! ```text
//! src/process/
//! ├── mod.rs            # Process-wide facade + docs
//! ├── group.rs          # ProcessGroup, fragmentation, rank partitioning
//! └── transport/
//!     ├── mod.rs        # Transport trait, ThreadSupport, SoloTransport
//!     ├── local.rs      # LocalCluster: in-process simulated group
//!     └── mpi_world.rs  # MpiTransport (feature `mpi`)
//! ```

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

mod group;
pub mod transport;

pub use group::ProcessGroup;
pub use transport::{
    LocalCluster, LocalTransport, SoloTransport, ThreadSupport, Transport,
    DEFAULT_MAX_MESSAGE_LEN,
};

static GROUP: OnceLock<ProcessGroup> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());
static FINALIZED: AtomicBool = AtomicBool::new(false);

/// Initialises the process-wide group with the default transport.
///
/// Uses MPI when built with the `mpi` feature, the group of one otherwise.
pub fn initialize() -> Result<&'static ProcessGroup> {
    initialize_with(default_transport)
}

#[cfg(feature = "mpi")]
fn default_transport() -> Result<transport::MpiTransport> {
    transport::MpiTransport::initialize()
}

#[cfg(not(feature = "mpi"))]
fn default_transport() -> Result<SoloTransport> {
    Ok(SoloTransport)
}

/// Initialises the process-wide group with a transport built by `factory`.
///
/// Only the first call has an effect; later calls return the existing group
/// without invoking their factory.
///
/// # Errors
/// Fails if the factory fails or the transport is rejected by
/// [`ProcessGroup::new`], notably when it cannot guarantee funneled threading.
pub fn initialize_with<T, F>(factory: F) -> Result<&'static ProcessGroup>
where
    T: Transport + 'static,
    F: FnOnce() -> Result<T>,
{
    if let Some(group) = GROUP.get() {
        return Ok(group);
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(group) = GROUP.get() {
        return Ok(group);
    }

    let transport = factory().context("Failed to create the process transport")?;
    let group = ProcessGroup::new(transport).context("Failed to initialize the process group")?;
    tracing::info!(
        rank = group.rank(),
        size = group.size(),
        "process group initialized"
    );
    Ok(GROUP.get_or_init(|| group))
}

/// Tears down the transport. Later calls are no-ops.
pub fn finalize() -> Result<()> {
    if let Some(group) = GROUP.get() {
        if !FINALIZED.swap(true, Ordering::AcqRel) {
            group
                .finalize_transport()
                .context("Failed to finalize the process transport")?;
        }
    }
    Ok(())
}

/// The process-wide group, if initialised.
pub fn group() -> Option<&'static ProcessGroup> {
    GROUP.get()
}

pub fn rank() -> usize {
    GROUP.get().map_or(0, ProcessGroup::rank)
}

pub fn size() -> usize {
    GROUP.get().map_or(1, ProcessGroup::size)
}

pub fn is_root() -> bool {
    rank() == 0
}

pub fn is_multi_proc() -> bool {
    size() > 1
}

/// Barrier across the process-wide group.
pub fn wait() -> Result<()> {
    match GROUP.get() {
        Some(group) => group.wait(),
        None => Ok(()),
    }
}

/// All-reduce sum across the process-wide group.
pub fn sum_to_all(buffer: &mut [f64]) -> Result<()> {
    match GROUP.get() {
        Some(group) => group.sum_to_all(buffer),
        None => Ok(()),
    }
}

/// Reduce-to-root sum across the process-wide group.
pub fn sum_to_root(buffer: &mut [f64]) -> Result<()> {
    match GROUP.get() {
        Some(group) => group.sum_to_root(buffer),
        None => Ok(()),
    }
}
