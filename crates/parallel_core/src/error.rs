//! Typed root causes for the failures this crate reports.
//!
//! Public operations return `anyhow::Result`; the variants below sit at the
//! bottom of the context chain so callers can `downcast_ref::<ParallelError>()`
//! when they need to tell configuration problems apart from callback failures.

use crate::process::ThreadSupport;

#[derive(Debug, thiserror::Error)]
pub enum ParallelError {
    /// A `ParallelEngine` needs at least the calling thread.
    #[error("thread count must be positive, got {0}")]
    InvalidThreadCount(usize),

    #[error("chunks per thread must be positive, got {0}")]
    InvalidChunksPerThread(usize),

    /// Overshooting claims from every participant would wrap the cursor.
    #[error("index range {max_index} is too large to dispatch over {threads} threads")]
    IndexRangeTooLarge { max_index: usize, threads: usize },

    /// Collectives are issued from worker-pool contexts, so the transport must
    /// at least allow one controlling thread alongside other running threads.
    #[error("transport provides {provided:?} threading, at least Funneled is required")]
    UnsupportedThreading { provided: ThreadSupport },

    #[error("invalid process group: rank {rank} of size {size}")]
    InvalidGroup { rank: usize, size: usize },

    /// Only detectable by transports that see every participant's buffer.
    #[error("reduction buffers differ in length across participants: {lengths:?}")]
    BufferLengthMismatch { lengths: Vec<usize> },
}
