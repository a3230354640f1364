//! `ParallelEngine`: runs a chunk callback over an index range on a persistent pool.

use anyhow::{Context, Result};
use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::config::EngineConfig;
use super::job::{chunk_size, ChunkFn, DispatchJob};
use super::pool::WorkerPool;
use super::thread::{current_worker_id, WorkerIdGuard};
use crate::error::ParallelError;
use crate::process::ProcessGroup;

/// Sent by a worker once it has stopped claiming chunks for a job.
#[derive(Debug)]
struct WorkerReport {
    worker_id: usize,
    chunks: usize,
}

type DispatchPool = WorkerPool<Arc<DispatchJob>, WorkerReport>;

/// Multi-threaded executor for index-range work.
///
/// The engine owns `thread_count - 1` worker threads; the thread calling
/// [`dispatch`](Self::dispatch) is the remaining participant. Workers are started
/// in [`new`](Self::new) and stopped when the engine is dropped.
///
/// ```ignore
/// let mut engine = ParallelEngine::with_threads(4)?;
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = hits.clone();
/// engine.dispatch(1_000, move |first, count| {
///     counter.fetch_add(count, Ordering::Relaxed);
///     Ok(())
/// })?;
/// assert_eq!(hits.load(Ordering::Relaxed), 1_000);
/// ```
pub struct ParallelEngine {
    config: EngineConfig,
    pool: Option<DispatchPool>,
}

impl ParallelEngine {
    /// Validates `config` and starts the worker threads.
    pub fn new(config: EngineConfig) -> Result<Self> {
        if config.thread_count == 0 {
            return Err(ParallelError::InvalidThreadCount(config.thread_count).into());
        }
        if config.chunks_per_thread == 0 {
            return Err(ParallelError::InvalidChunksPerThread(config.chunks_per_thread).into());
        }

        let pool = if config.thread_count > 1 {
            Some(
                Self::create_pool(config.thread_count - 1)
                    .context("Failed to start dispatch worker threads")?,
            )
        } else {
            None
        };

        tracing::info!(
            threads = config.thread_count,
            chunks_per_thread = config.chunks_per_thread,
            "parallel engine ready"
        );

        Ok(Self { config, pool })
    }

    /// Engine with `thread_count` participants and default chunking.
    pub fn with_threads(thread_count: usize) -> Result<Self> {
        Self::new(EngineConfig::builder().thread_count(thread_count).build())
    }

    pub fn thread_count(&self) -> usize {
        self.config.thread_count
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn create_pool(num_workers: usize) -> Result<DispatchPool> {
        DispatchPool::new(num_workers, 1, |job_rx, report_tx, shutdown| {
            let worker_id = current_worker_id();

            while let Ok(job) = job_rx.recv() {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let chunks = job.run();
                // The dispatching thread must hold the last reference to the job
                drop(job);

                if report_tx.send(WorkerReport { worker_id, chunks }).is_err() {
                    break;
                }
            }
        })
    }

    /// Calls `callback(first, count)` for chunks partitioning `[0, max_index)`.
    ///
    /// Blocks until every participant has stopped claiming chunks. The callback
    /// runs concurrently with itself on disjoint ranges and on any thread of the
    /// engine, including the calling one.
    ///
    /// # Errors
    /// If the callback returns an error or panics, no further chunks are claimed,
    /// chunks already running finish, and the first failure is returned. Work done
    /// by other chunks stays visible to the caller but is incomplete.
    pub fn dispatch<F>(&mut self, max_index: usize, callback: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatch_range(0..max_index, Arc::new(callback))
    }

    /// Dispatches only this process's share of `[0, max_index)`.
    ///
    /// The range is cut into `group.size()` contiguous blocks (see
    /// [`ProcessGroup::local_range`]); the callback receives absolute indices.
    /// Run on every rank, the union of all chunks covers `[0, max_index)` exactly
    /// once. Results usually need a `sum_to_all` or `sum_to_root` afterwards.
    pub fn dispatch_distributed<F>(
        &mut self,
        group: &ProcessGroup,
        max_index: usize,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(usize, usize) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatch_range(group.local_range(max_index), Arc::new(callback))
    }

    fn dispatch_range(&mut self, range: Range<usize>, callback: Arc<ChunkFn>) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }

        let threads = self.config.thread_count;
        let chunk_size = chunk_size(range.len(), threads, self.config.chunks_per_thread);

        // Each participant overshoots the end by at most one chunk
        let fits = chunk_size
            .checked_mul(threads)
            .and_then(|overshoot| range.end.checked_add(overshoot))
            .is_some();
        if !fits {
            return Err(ParallelError::IndexRangeTooLarge {
                max_index: range.end,
                threads,
            }
            .into());
        }

        tracing::debug!(
            start = range.start,
            end = range.end,
            chunk_size,
            threads,
            "dispatch started"
        );

        let job = Arc::new(DispatchJob::new(callback, range.clone(), chunk_size));

        if let Some(pool) = &self.pool {
            pool.broadcast(job.clone())
                .context("Failed to hand dispatch to worker threads")?;
        }

        let mut total_chunks = {
            let _caller = WorkerIdGuard::enter(0);
            job.run()
        };

        if let Some(pool) = &self.pool {
            for _ in 0..pool.len() {
                let report = pool
                    .recv()
                    .context("Lost contact with worker threads during dispatch")?;
                tracing::trace!(
                    worker_id = report.worker_id,
                    chunks = report.chunks,
                    "worker rejoined"
                );
                total_chunks += report.chunks;
            }
        }

        match job.take_failure() {
            Some(err) => Err(err.context(format!(
                "Dispatch over [{}, {}) did not complete",
                range.start, range.end
            ))),
            None => {
                tracing::debug!(chunks = total_chunks, "dispatch finished");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn zero_threads_is_a_configuration_error() {
        let err = ParallelEngine::with_threads(0).err().expect("must fail");
        assert!(matches!(
            err.downcast_ref::<ParallelError>(),
            Some(ParallelError::InvalidThreadCount(0))
        ));
    }

    #[test]
    fn zero_chunks_per_thread_is_a_configuration_error() {
        let config = EngineConfig::builder()
            .thread_count(2)
            .chunks_per_thread(0)
            .build();
        assert!(ParallelEngine::new(config).is_err());
    }

    #[test]
    fn empty_range_never_calls_back() -> Result<()> {
        let mut engine = ParallelEngine::with_threads(3)?;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        engine.dispatch(0, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn single_thread_runs_on_caller() -> Result<()> {
        let mut engine = ParallelEngine::with_threads(1)?;
        let caller = std::thread::current().id();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.dispatch(100, move |first, count| {
            assert_eq!(std::thread::current().id(), caller);
            sink.lock().unwrap().push((first, count));
            Ok(())
        })?;

        let seen = seen.lock().unwrap();
        let covered: usize = seen.iter().map(|(_, count)| count).sum();
        assert_eq!(covered, 100);
        Ok(())
    }

    #[test]
    fn worker_ids_stay_below_thread_count() -> Result<()> {
        let mut engine = ParallelEngine::with_threads(4)?;
        let max_id = Arc::new(AtomicUsize::new(0));
        let observed = max_id.clone();
        engine.dispatch(10_000, move |_, _| {
            observed.fetch_max(current_worker_id(), Ordering::SeqCst);
            Ok(())
        })?;
        assert!(max_id.load(Ordering::SeqCst) < 4);
        Ok(())
    }

    #[test]
    fn caller_is_participant_zero_inside_another_pool() -> Result<()> {
        let mut outer = ParallelEngine::with_threads(4)?;
        let max_inner_id = Arc::new(AtomicUsize::new(0));
        let restored = Arc::new(AtomicUsize::new(0));
        let (inner_sink, restored_sink) = (max_inner_id.clone(), restored.clone());

        outer.dispatch(8, move |_, _| {
            let outer_id = current_worker_id();
            let mut inner = ParallelEngine::with_threads(2)?;
            let sink = inner_sink.clone();
            inner.dispatch(200, move |_, _| {
                sink.fetch_max(current_worker_id(), Ordering::SeqCst);
                Ok(())
            })?;
            if current_worker_id() == outer_id {
                restored_sink.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })?;

        assert!(max_inner_id.load(Ordering::SeqCst) < 2);
        assert_eq!(restored.load(Ordering::SeqCst), 8);
        Ok(())
    }

    #[test]
    fn oversized_range_is_rejected_before_work() -> Result<()> {
        let mut engine = ParallelEngine::with_threads(2)?;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = engine
            .dispatch(usize::MAX, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .err()
            .expect("must fail");
        assert!(matches!(
            err.downcast_ref::<ParallelError>(),
            Some(ParallelError::IndexRangeTooLarge { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
