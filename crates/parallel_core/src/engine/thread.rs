//! Thread-local participant identification.
//!
//! Every thread taking part in a dispatch carries an ID: 0 for the thread that
//! called `dispatch`, 1..thread_count for the pool workers. Callbacks can read it
//! to index per-thread accumulation buffers without locking.

use std::cell::Cell;

thread_local! {
    /// Participant ID of the current thread.
    ///
    /// Pool workers set this once when spawned. Threads that never joined a
    /// pool (including the dispatching thread) keep the default of 0.
    pub static WORKER_ID: Cell<usize> = const { Cell::new(0) };
}

/// Returns the participant ID of the calling thread.
///
/// Inside a dispatch callback this is a value in `0..thread_count`, unique among
/// the threads currently running chunks for that dispatch.
pub fn current_worker_id() -> usize {
    WORKER_ID.with(|id| id.get())
}

pub(crate) fn set_worker_id(worker_id: usize) {
    WORKER_ID.with(|id| id.set(worker_id));
}

/// Sets the current thread's ID until dropped, then restores the previous one.
///
/// The dispatching thread is participant 0 of its own dispatch even when it is a
/// worker of another engine.
pub(crate) struct WorkerIdGuard {
    previous: usize,
}

impl WorkerIdGuard {
    pub(crate) fn enter(worker_id: usize) -> Self {
        let previous = current_worker_id();
        set_worker_id(worker_id);
        Self { previous }
    }
}

impl Drop for WorkerIdGuard {
    fn drop(&mut self) {
        set_worker_id(self.previous);
    }
}
