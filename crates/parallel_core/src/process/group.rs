//! `ProcessGroup`: rank-aware collectives over a transport.
//!
//! Transports address element counts with a bounded integer. Buffers longer than
//! the transport's ceiling are reduced as consecutive fragments in increasing
//! offset order, each written back to the same offsets. Every element belongs to
//! exactly one fragment, so only the summation grouping can differ from an
//! unbounded call, never the set of summed values.

use anyhow::{Context, Result};
use std::fmt;
use std::ops::Range;

use super::transport::{SoloTransport, ThreadSupport, Transport};
use crate::error::ParallelError;

/// This process's view of the cooperating group.
pub struct ProcessGroup {
    rank: usize,
    size: usize,
    transport: Box<dyn Transport>,
}

impl ProcessGroup {
    /// Wraps `transport` after checking that it can serve a multi-threaded process.
    ///
    /// # Errors
    /// - `ParallelError::UnsupportedThreading` if the transport offers less than
    ///   `ThreadSupport::Funneled`
    /// - `ParallelError::InvalidGroup` if the reported rank and size are inconsistent
    pub fn new<T>(transport: T) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let provided = transport.thread_support();
        if provided < ThreadSupport::Funneled {
            return Err(ParallelError::UnsupportedThreading { provided }.into());
        }

        let (rank, size) = (transport.rank(), transport.size());
        if size == 0 || rank >= size {
            return Err(ParallelError::InvalidGroup { rank, size }.into());
        }

        Ok(Self {
            rank,
            size,
            transport: Box::new(transport),
        })
    }

    /// The group of one.
    pub fn solo() -> Self {
        Self {
            rank: 0,
            size: 1,
            transport: Box::new(SoloTransport),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Rank 0 receives the result of [`sum_to_root`](Self::sum_to_root).
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn is_multi_proc(&self) -> bool {
        self.size > 1
    }

    /// Blocks until every participant has called `wait`.
    pub fn wait(&self) -> Result<()> {
        if !self.is_multi_proc() {
            return Ok(());
        }
        self.transport
            .barrier()
            .with_context(|| format!("Barrier failed on rank {}", self.rank))
    }

    /// Replaces `buffer` on every participant by the element-wise sum of all
    /// participants' buffers.
    ///
    /// All participants must pass buffers of the same length.
    pub fn sum_to_all(&self, buffer: &mut [f64]) -> Result<()> {
        if !self.is_multi_proc() {
            return Ok(());
        }
        self.for_each_fragment(buffer, |fragment| self.transport.all_reduce_sum(fragment))
            .with_context(|| format!("sum_to_all failed on rank {}", self.rank))
    }

    /// Replaces `buffer` on the root by the element-wise sum of all participants'
    /// buffers. Non-root buffers must not be relied upon afterwards.
    ///
    /// All participants must pass buffers of the same length.
    pub fn sum_to_root(&self, buffer: &mut [f64]) -> Result<()> {
        if !self.is_multi_proc() {
            return Ok(());
        }
        self.for_each_fragment(buffer, |fragment| {
            self.transport.reduce_sum_to_root(fragment)
        })
        .with_context(|| format!("sum_to_root failed on rank {}", self.rank))
    }

    pub(crate) fn finalize_transport(&self) -> Result<()> {
        self.transport.finalize()
    }

    /// This rank's contiguous block of `[0, max_index)`.
    ///
    /// Blocks differ in length by at most one; lower ranks get the longer ones.
    pub fn local_range(&self, max_index: usize) -> Range<usize> {
        block_range(max_index, self.size, self.rank)
    }

    /// Runs `reduce` on consecutive fragments of at most `max_message_len`
    /// elements. An empty buffer still produces one (empty) call so that every
    /// participant passes through the collective.
    fn for_each_fragment<F>(&self, buffer: &mut [f64], mut reduce: F) -> Result<()>
    where
        F: FnMut(&mut [f64]) -> Result<()>,
    {
        if buffer.is_empty() {
            return reduce(buffer);
        }

        let max_len = self.transport.max_message_len().max(1);
        if buffer.len() > max_len {
            tracing::debug!(
                len = buffer.len(),
                max_len,
                fragments = buffer.len().div_ceil(max_len),
                "fragmenting reduction buffer"
            );
        }

        for (index, fragment) in buffer.chunks_mut(max_len).enumerate() {
            let len = fragment.len();
            reduce(fragment).with_context(|| {
                format!(
                    "Reduction of fragment {} ({} elements at offset {}) failed",
                    index,
                    len,
                    index * max_len
                )
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

/// Block `rank` of `[0, len)` cut into `parts` near-equal contiguous blocks.
pub(crate) fn block_range(len: usize, parts: usize, rank: usize) -> Range<usize> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;
    let start = rank * base + rank.min(extra);
    let end = start + base + usize::from(rank < extra);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::transport::LocalCluster;

    struct SingleThreaded;

    impl Transport for SingleThreaded {
        fn rank(&self) -> usize {
            0
        }
        fn size(&self) -> usize {
            2
        }
        fn thread_support(&self) -> ThreadSupport {
            ThreadSupport::Single
        }
        fn barrier(&self) -> Result<()> {
            Ok(())
        }
        fn all_reduce_sum(&self, _data: &mut [f64]) -> Result<()> {
            Ok(())
        }
        fn reduce_sum_to_root(&self, _data: &mut [f64]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejects_transport_without_funneled_threading() {
        let err = ProcessGroup::new(SingleThreaded).err().expect("must fail");
        assert!(matches!(
            err.downcast_ref::<ParallelError>(),
            Some(ParallelError::UnsupportedThreading {
                provided: ThreadSupport::Single
            })
        ));
    }

    #[test]
    fn funneled_threading_is_enough() -> Result<()> {
        let endpoints = LocalCluster::new(1)
            .thread_support(ThreadSupport::Funneled)
            .endpoints();
        for endpoint in endpoints {
            let group = ProcessGroup::new(endpoint)?;
            assert!(group.is_root());
        }
        Ok(())
    }

    #[test]
    fn solo_group_is_root_and_single() -> Result<()> {
        let group = ProcessGroup::solo();
        assert_eq!((group.rank(), group.size()), (0, 1));
        assert!(group.is_root());
        assert!(!group.is_multi_proc());

        let mut buffer = vec![0.5, 1.5];
        group.sum_to_all(&mut buffer)?;
        group.sum_to_root(&mut buffer)?;
        group.wait()?;
        assert_eq!(buffer, vec![0.5, 1.5]);
        Ok(())
    }

    #[test]
    fn block_ranges_tile_the_index_range() {
        for len in [0, 1, 7, 10, 64] {
            for parts in 1..6 {
                let mut next = 0;
                for rank in 0..parts {
                    let range = block_range(len, parts, rank);
                    assert_eq!(range.start, next);
                    assert!(range.len() <= len / parts + 1);
                    next = range.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn lower_ranks_get_the_remainder() {
        assert_eq!(block_range(10, 3, 0), 0..4);
        assert_eq!(block_range(10, 3, 1), 4..7);
        assert_eq!(block_range(10, 3, 2), 7..10);
    }

    #[test]
    fn debug_shows_rank_and_size() {
        let text = format!("{:?}", ProcessGroup::solo());
        assert!(text.contains("rank: 0"));
        assert!(text.contains("size: 1"));
    }
}
