//! Parallel execution core for Monte-Carlo simulation drivers.
//!
//! Two independent layers:
//! - [`engine`]: a persistent thread pool that runs a chunk callback over an index
//!   range, claiming chunks from a shared atomic cursor
//! - [`process`]: a process group with barrier and `f64` sum collectives that
//!   fragments buffers larger than the transport's per-call limit
//!
//! A typical phase runs a thread-parallel dispatch that accumulates into a
//! per-process buffer, then sums that buffer across processes:
//!
//! ```ignore
//! use parallel_core::{process, ParallelEngine};
//!
//! process::initialize()?;
//! let mut engine = ParallelEngine::with_threads(8)?;
//! engine.dispatch(num_packets, move |first, count| {
//!     for packet in first..first + count {
//!         launch(packet, &detector)?;
//!     }
//!     Ok(())
//! })?;
//! let mut totals = detector.snapshot();
//! process::sum_to_root(&mut totals)?;
//! ```

pub mod engine;
pub mod error;
pub mod process;

pub use engine::{Chunk, EngineConfig, ParallelEngine};
pub use error::ParallelError;
pub use process::{LocalCluster, ProcessGroup, ThreadSupport, Transport};
