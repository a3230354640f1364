//! Persistent worker threads for the dispatch engine.
//!
//! The pool is created once per engine and lives until the engine is dropped.
//! Each worker owns a dedicated task channel and parks in a blocking `recv` on
//! it while idle, so an idle pool burns no CPU. Workers report back on one
//! shared output channel.
//!
//! # Key features
//! - Per-worker bounded channels, so a broadcast reaches every worker exactly once
//! - Graceful shutdown on drop: senders are dropped, then every thread is joined
//! - Thread-local worker IDs, starting at 1 (ID 0 is the dispatching thread)
//! - Generic over task and output types

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::thread::set_worker_id;

/// Fixed set of long-lived worker threads.
///
/// - Task channels: dispatching thread -> each worker
/// - Output channel: workers -> dispatching thread
/// - Shutdown flag: checked by workers between tasks
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_txs: Vec<Sender<Task>>,
    output_rx: Receiver<Output>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads running `worker_fn`.
    ///
    /// `worker_fn` receives the worker's own task receiver, a clone of the output
    /// sender and the shutdown flag. It should return once its receiver is
    /// disconnected.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with 0 workers. \
                Run single-threaded on the calling thread instead."
            ));
        }

        if buffer_size == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            ));
        }

        let (output_tx, output_rx) = bounded(buffer_size * num_workers);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);

        let mut workers = Vec::with_capacity(num_workers);
        let mut task_txs = Vec::with_capacity(num_workers);

        for index in 0..num_workers {
            let worker_id = index + 1;
            let (task_tx, task_rx) = bounded(buffer_size);
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("parallel-worker-{}", worker_id))
                .spawn(move || {
                    set_worker_id(worker_id);
                    worker_fn_clone(task_rx, output_tx, shutdown_clone);
                })
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            workers.push(handle);
            task_txs.push(task_tx);
        }

        tracing::debug!(num_workers, "worker pool started");

        Ok(Self {
            workers,
            task_txs,
            output_rx,
            shutdown,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Sends a clone of `task` to every worker.
    pub(crate) fn broadcast(&self, task: Task) -> Result<()>
    where
        Task: Clone,
    {
        for (index, tx) in self.task_txs.iter().enumerate() {
            tx.send(task.clone())
                .map_err(|_| anyhow!("Worker {} is no longer accepting tasks", index + 1))?;
        }
        Ok(())
    }

    /// Blocks until one worker reports.
    pub(crate) fn recv(&self) -> Result<Output> {
        self.output_rx
            .recv()
            .map_err(|_| anyhow!("All worker threads have exited"))
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // Closing the task channels wakes every parked worker
        self.task_txs.clear();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("worker thread panicked outside of a task");
            }
        }

        tracing::debug!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::thread::current_worker_id;
    use std::collections::HashSet;

    fn echo_pool(num_workers: usize) -> Result<WorkerPool<u32, (usize, u32)>> {
        WorkerPool::new(num_workers, 1, |task_rx, output_tx, shutdown| {
            while let Ok(task) = task_rx.recv() {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if output_tx.send((current_worker_id(), task * 2)).is_err() {
                    break;
                }
            }
        })
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(echo_pool(0).is_err());
    }

    #[test]
    fn rejects_zero_buffer() {
        let pool: Result<WorkerPool<u32, u32>> = WorkerPool::new(2, 0, |_, _, _| {});
        assert!(pool.is_err());
    }

    #[test]
    fn broadcast_reaches_every_worker_once() -> Result<()> {
        let pool = echo_pool(4)?;
        assert_eq!(pool.len(), 4);

        pool.broadcast(21)?;
        let mut ids = HashSet::new();
        for _ in 0..4 {
            let (id, value) = pool.recv()?;
            assert_eq!(value, 42);
            ids.insert(id);
        }
        assert_eq!(ids, (1..=4).collect::<HashSet<_>>());
        Ok(())
    }

    #[test]
    fn workers_are_reused_across_broadcasts() -> Result<()> {
        let pool = echo_pool(2)?;
        for round in 0..10 {
            pool.broadcast(round)?;
            for _ in 0..2 {
                let (id, value) = pool.recv()?;
                assert!(id == 1 || id == 2);
                assert_eq!(value, round * 2);
            }
        }
        Ok(())
    }

    #[test]
    fn drop_joins_idle_workers() -> Result<()> {
        let pool = echo_pool(3)?;
        drop(pool);
        Ok(())
    }
}
