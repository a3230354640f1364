//! In-process transport: every participant is a thread of the current process.
//!
//! All endpoints of a `LocalCluster` share one rendezvous. A collective call
//! deposits the caller's buffer into its rank's slot, waits for everyone, reads
//! the combined result and waits again so no participant can overwrite a slot
//! another one is still reading. Sums are taken in rank order, so every
//! participant computes bit-identical values.
//!
//! Unlike MPI, the local transport sees every participant's buffer and reports
//! length mismatches within one call as `ParallelError::BufferLengthMismatch`
//! on all ranks. A mismatch that falls on a fragment boundary pairs the longer
//! buffer's extra fragments with the next collective of the other ranks and
//! goes undetected.

use anyhow::{bail, ensure, Context, Result};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};
use std::thread;

use super::{ThreadSupport, Transport, DEFAULT_MAX_MESSAGE_LEN};
use crate::error::ParallelError;
use crate::process::ProcessGroup;

struct Rendezvous {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

impl Rendezvous {
    fn slots(&self) -> MutexGuard<'_, Vec<Vec<f64>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Describes a simulated group and hands out its endpoints.
///
/// ```ignore
/// let sums = LocalCluster::new(4).max_message_len(1024).run(|group| {
///     let mut buffer = vec![1.0; 10_000];
///     group.sum_to_all(&mut buffer)?;
///     Ok(buffer[0])
/// })?;
/// assert_eq!(sums, vec![4.0; 4]);
/// ```
#[derive(Clone, Debug)]
pub struct LocalCluster {
    size: usize,
    max_message_len: usize,
    thread_support: ThreadSupport,
}

impl LocalCluster {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            thread_support: ThreadSupport::Multiple,
        }
    }

    /// Lowers the per-call element ceiling, to exercise fragmentation.
    pub fn max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Threading level the endpoints advertise.
    pub fn thread_support(mut self, thread_support: ThreadSupport) -> Self {
        self.thread_support = thread_support;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One endpoint per rank, in rank order. Each must be driven from its own thread.
    pub fn endpoints(&self) -> Vec<LocalTransport> {
        let shared = Arc::new(Rendezvous {
            barrier: Barrier::new(self.size.max(1)),
            slots: Mutex::new(vec![Vec::new(); self.size]),
        });

        (0..self.size)
            .map(|rank| LocalTransport {
                rank,
                size: self.size,
                shared: shared.clone(),
                max_message_len: self.max_message_len,
                thread_support: self.thread_support,
                fragments: Mutex::new(Vec::new()),
            })
            .collect()
    }

    /// Runs `participant` once per rank, each on its own thread, and returns the
    /// results in rank order.
    ///
    /// Fails if any group cannot be created or any participant fails. A
    /// participant that fails before a collective the others are waiting in
    /// leaves them blocked, as it would with a real transport.
    pub fn run<T, F>(&self, participant: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(ProcessGroup) -> Result<T> + Sync,
    {
        ensure!(self.size > 0, "A local cluster needs at least one participant");

        let participant = &participant;
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .endpoints()
                .into_iter()
                .map(|endpoint| {
                    let rank = endpoint.rank;
                    let handle = thread::Builder::new()
                        .name(format!("local-rank-{}", rank))
                        .spawn_scoped(scope, move || {
                            let group = ProcessGroup::new(endpoint)?;
                            participant(group)
                        })
                        .with_context(|| format!("Failed to spawn participant {}", rank))?;
                    Ok((rank, handle))
                })
                .collect::<Result<_>>()?;

            handles
                .into_iter()
                .map(|(rank, handle)| match handle.join() {
                    Ok(result) => result.with_context(|| format!("Participant {} failed", rank)),
                    Err(_) => bail!("Participant {} panicked", rank),
                })
                .collect()
        })
    }
}

/// Endpoint of one rank of a `LocalCluster`.
pub struct LocalTransport {
    rank: usize,
    size: usize,
    shared: Arc<Rendezvous>,
    max_message_len: usize,
    thread_support: ThreadSupport,
    fragments: Mutex<Vec<usize>>,
}

impl LocalTransport {
    /// Lengths of the buffers passed to reduction calls so far, in call order.
    pub fn fragment_log(&self) -> Vec<usize> {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publishes `data` in this rank's slot and waits for every participant.
    fn deposit(&self, data: &[f64]) -> Result<()> {
        if data.len() > self.max_message_len {
            bail!(
                "Message of {} elements exceeds the transport limit of {}",
                data.len(),
                self.max_message_len
            );
        }
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.len());

        {
            let mut slots = self.shared.slots();
            let slot = &mut slots[self.rank];
            slot.clear();
            slot.extend_from_slice(data);
        }
        self.shared.barrier.wait();
        Ok(())
    }

    /// Fails on every rank when the deposited buffers differ in length.
    fn check_lengths(slots: &[Vec<f64>]) -> Result<()> {
        if slots.windows(2).any(|pair| pair[0].len() != pair[1].len()) {
            return Err(ParallelError::BufferLengthMismatch {
                lengths: slots.iter().map(Vec::len).collect(),
            }
            .into());
        }
        Ok(())
    }

    /// Rank-ordered element-wise sum of all slots into `data`.
    fn combine_into(&self, data: &mut [f64]) -> Result<()> {
        let slots = self.shared.slots();
        Self::check_lengths(&slots)?;

        for (index, value) in data.iter_mut().enumerate() {
            *value = slots.iter().map(|slot| slot[index]).sum();
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
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
        self.max_message_len
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn all_reduce_sum(&self, data: &mut [f64]) -> Result<()> {
        self.deposit(data)?;
        let outcome = self.combine_into(data);
        // Nobody may deposit the next fragment while others still read this one
        self.shared.barrier.wait();
        outcome
    }

    fn reduce_sum_to_root(&self, data: &mut [f64]) -> Result<()> {
        self.deposit(data)?;
        let outcome = if self.rank == 0 {
            self.combine_into(data)
        } else {
            Self::check_lengths(&self.shared.slots())
        };
        self.shared.barrier.wait();
        outcome
    }
}
