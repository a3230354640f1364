//! Configuration for `ParallelEngine`.
//!
//! Example:
//! ```ignore
//! let config = EngineConfig::builder()
//!     .thread_count(8)
//!     .chunks_per_thread(8)
//!     .build();
//! let mut engine = ParallelEngine::new(config)?;
//! ```
//!
//! # Tuning
//! - `thread_count`: total participants per dispatch, *including* the calling
//!   thread. `1` runs everything on the caller and spawns no worker.
//! - `chunks_per_thread`: how many chunks each participant gets on average.
//!   Higher values balance heterogeneous per-index cost better; lower values
//!   claim less often. Claims are a single atomic add, so the default leans
//!   towards balance.

/// Default number of chunks per participant.
///
/// A claim costs one atomic read-modify-write on a shared cache line, which is
/// tens of nanoseconds, while waking a parked worker costs microseconds. With 8
/// chunks per participant the slowest thread finishes at most about 1/8 of a
/// per-thread share after the others, and a dispatch issues only `8 * threads`
/// claims in total.
pub const DEFAULT_CHUNKS_PER_THREAD: usize = 8;

/// Configuration for `ParallelEngine`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of participating threads, the dispatching thread included.
    pub thread_count: usize,
    /// Target number of chunks per participating thread.
    pub chunks_per_thread: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_count: num_cpus::get(),
            chunks_per_thread: DEFAULT_CHUNKS_PER_THREAD,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig with method chaining
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the number of participating threads (must be > 0)
    pub fn thread_count(mut self, threads: usize) -> Self {
        self.config.thread_count = threads;
        self
    }

    /// Set the chunk granularity (must be > 0)
    pub fn chunks_per_thread(mut self, chunks: usize) -> Self {
        self.config.chunks_per_thread = chunks;
        self
    }

    /// Build the final configuration.
    ///
    /// Values are validated when the engine is constructed.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
