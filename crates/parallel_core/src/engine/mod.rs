//! Work distribution inside one process.
//!
//! A `ParallelEngine` owns a fixed pool of worker threads and runs an opaque
//! chunk callback over an index range `[0, max_index)`:
//!
//! ```text
//!            dispatch(max_index, callback)
//!                        │
//!              ┌─────────┴──────────┐
//!              │    DispatchJob     │  chunk size, end, atomic cursor
//!              └─────────┬──────────┘
//!         ┌──────────────┼──────────────┐
//!         ↓              ↓              ↓
//!   calling thread   worker 1  ...  worker N-1     each: fetch_add(cursor, chunk)
//!         │              │              │                → callback(first, count)
//!         └──────────────┴──────┬───────┘
//!                               ↓
//!                   reports collected, first error re-raised
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/engine/
//! ├── mod.rs          # Public API exports + architecture docs
//! ├── config.rs       # EngineConfig, builder
//! ├── dispatcher.rs   # ParallelEngine and the dispatch protocol
//! ├── job.rs          # DispatchJob, Chunk, chunk size heuristic
//! ├── pool.rs         # Generic persistent `WorkerPool<Task, Output>`
//! └── thread.rs       # Thread-local participant ID
//! ```
//!
//! # Guarantees
//! - Every index of `[0, max_index)` is passed to exactly one callback invocation,
//!   unless a callback fails, in which case unclaimed indices are skipped.
//! - No ordering between chunks is guaranteed.
//! - `dispatch` returns only after all participants have stopped.

mod config;
mod dispatcher;
mod job;
mod pool;
mod thread;

pub use config::{EngineConfig, EngineConfigBuilder, DEFAULT_CHUNKS_PER_THREAD};
pub use dispatcher::ParallelEngine;
pub use job::{chunk_size, Chunk, ChunkFn};
pub use thread::{current_worker_id, WORKER_ID};
