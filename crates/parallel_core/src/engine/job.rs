//! One `dispatch` invocation: the callback, the index range and the shared cursor.
//!
//! Participants claim chunks with a single `fetch_add` on `next_index`. Since every
//! claim returns a distinct prior cursor value, the claimed chunks are pairwise
//! disjoint, and since claiming only stops once the cursor has passed the end of
//! the range, together they cover it. The cursor is the only state the
//! participants share on the success path.

use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Work unit invoked as `callback(first_index, num_indices)`.
pub type ChunkFn = dyn Fn(usize, usize) -> Result<()> + Send + Sync;

/// Half-open index range `[first, first + count)` claimed by one participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub first: usize,
    pub count: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.first + self.count
    }

    pub fn range(&self) -> Range<usize> {
        self.first..self.end()
    }
}

/// Nominal chunk length for a dispatch over `max_index` indices.
///
/// Aims at `chunks_per_thread` chunks per participant, floored at one index per
/// chunk. Only the last chunk of a dispatch may be shorter.
pub fn chunk_size(max_index: usize, thread_count: usize, chunks_per_thread: usize) -> usize {
    let target_chunks = thread_count.saturating_mul(chunks_per_thread).max(1);
    (max_index / target_chunks).max(1)
}

pub(crate) struct DispatchJob {
    callback: Arc<ChunkFn>,
    chunk_size: usize,
    end: usize,
    next_index: AtomicUsize,
    abort: AtomicBool,
    failure: Mutex<Option<anyhow::Error>>,
}

impl DispatchJob {
    /// `range` must be non-empty and `chunk_size` positive.
    pub(crate) fn new(callback: Arc<ChunkFn>, range: Range<usize>, chunk_size: usize) -> Self {
        Self {
            callback,
            chunk_size,
            end: range.end,
            next_index: AtomicUsize::new(range.start),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    /// Claims the next chunk, or `None` once the range is exhausted or a
    /// participant has failed.
    pub(crate) fn claim(&self) -> Option<Chunk> {
        if self.abort.load(Ordering::Acquire) {
            return None;
        }
        let first = self.next_index.fetch_add(self.chunk_size, Ordering::Relaxed);
        if first >= self.end {
            return None;
        }
        Some(Chunk {
            first,
            count: self.chunk_size.min(self.end - first),
        })
    }

    /// Claims and executes chunks until none are left. Returns the number of
    /// chunks this participant executed.
    pub(crate) fn run(&self) -> usize {
        let mut executed = 0;
        while let Some(chunk) = self.claim() {
            executed += 1;
            if let Err(err) = self.execute(chunk) {
                self.fail(err);
                break;
            }
        }
        executed
    }

    fn execute(&self, chunk: Chunk) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.callback)(chunk.first, chunk.count)
        }));
        match outcome {
            Ok(result) => result.with_context(|| {
                format!("Chunk [{}, {}) failed", chunk.first, chunk.end())
            }),
            Err(payload) => Err(anyhow!(
                "Chunk [{}, {}) panicked: {}",
                chunk.first,
                chunk.end(),
                panic_message(payload.as_ref())
            )),
        }
    }

    /// Stops further claims and keeps the first failure only.
    fn fail(&self, err: anyhow::Error) {
        self.abort.store(true, Ordering::Release);
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!(error = %format!("{err:#}"), "suppressing secondary chunk failure");
        }
    }

    pub(crate) fn take_failure(&self) -> Option<anyhow::Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
