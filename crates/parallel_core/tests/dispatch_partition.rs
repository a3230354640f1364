//! Partition and load-balancing tests for `ParallelEngine::dispatch`.
//!
//! Tests cover:
//! - Chunks tile `[0, max_index)` for any range and thread count
//! - Counting through the callback yields exactly `max_index`
//! - Workers persist across dispatches
//! - Heterogeneous per-index cost is spread over all threads

mod common;
use common::{assert_partition, record_chunks};

use anyhow::Result;
use parallel_core::engine::{chunk_size, current_worker_id};
use parallel_core::{EngineConfig, ParallelEngine};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn engine(threads: usize, chunks_per_thread: usize) -> Result<ParallelEngine> {
    ParallelEngine::new(
        EngineConfig::builder()
            .thread_count(threads)
            .chunks_per_thread(chunks_per_thread)
            .build(),
    )
}

// ============================================================================
// 1. Partition invariant
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chunks_partition_the_range(
        max_index in 0usize..5_000,
        threads in 1usize..6,
        chunks_per_thread in 1usize..12,
    ) {
        let mut engine = engine(threads, chunks_per_thread).unwrap();
        let chunks = record_chunks(&mut engine, max_index).unwrap();

        assert_partition(&chunks, max_index);
        if max_index == 0 {
            prop_assert!(chunks.is_empty());
        }

        let nominal = chunk_size(max_index, threads, chunks_per_thread);
        for chunk in &chunks[..chunks.len().saturating_sub(1)] {
            prop_assert_eq!(chunk.count, nominal);
        }
        if let Some(last) = chunks.last() {
            prop_assert!(last.count <= nominal);
        }
    }
}

#[test]
fn counter_matches_max_index_for_all_thread_counts() -> Result<()> {
    for threads in 1..=8 {
        let mut engine = ParallelEngine::with_threads(threads)?;
        for max_index in [1, 2, 7, 100, 12_345] {
            let counter = Arc::new(AtomicUsize::new(0));
            let sink = counter.clone();
            engine.dispatch(max_index, move |_, count| {
                sink.fetch_add(count, Ordering::Relaxed);
                Ok(())
            })?;
            assert_eq!(
                counter.load(Ordering::Relaxed),
                max_index,
                "threads = {}, max_index = {}",
                threads,
                max_index
            );
        }
    }
    Ok(())
}

#[test]
fn every_index_is_visited_once() -> Result<()> {
    let mut engine = ParallelEngine::with_threads(4)?;
    let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..10_000).map(|_| AtomicUsize::new(0)).collect());
    let sink = hits.clone();
    engine.dispatch(hits.len(), move |first, count| {
        for index in first..first + count {
            sink[index].fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    })?;
    assert!(hits.iter().all(|hit| hit.load(Ordering::Relaxed) == 1));
    Ok(())
}

#[test]
fn fewer_indices_than_threads() -> Result<()> {
    let mut engine = ParallelEngine::with_threads(8)?;
    let chunks = record_chunks(&mut engine, 3)?;
    assert_partition(&chunks, 3);
    assert_eq!(chunks.len(), 3);
    Ok(())
}

// ============================================================================
// 2. Pool lifecycle
// ============================================================================

#[test]
fn workers_persist_across_dispatches() -> Result<()> {
    let mut engine = ParallelEngine::with_threads(3)?;
    let names = Arc::new(Mutex::new(HashSet::new()));

    for _ in 0..20 {
        let sink = names.clone();
        engine.dispatch(3_000, move |_, _| {
            let name = std::thread::current().name().map(str::to_owned);
            sink.lock().unwrap().insert(name);
            std::thread::sleep(Duration::from_micros(50));
            Ok(())
        })?;
    }

    let names = names.lock().unwrap();
    let workers: HashSet<_> = names
        .iter()
        .flatten()
        .filter(|name| name.starts_with("parallel-worker-"))
        .collect();
    assert!(
        workers.len() <= 2,
        "expected at most 2 pool threads, saw {:?}",
        workers
    );
    Ok(())
}

#[test]
fn engine_can_be_dropped_and_recreated() -> Result<()> {
    for _ in 0..5 {
        let mut engine = ParallelEngine::with_threads(4)?;
        let chunks = record_chunks(&mut engine, 1_000)?;
        assert_partition(&chunks, 1_000);
    }
    Ok(())
}

// ============================================================================
// 3. Load balancing
// ============================================================================

#[test]
fn heterogeneous_cost_is_shared_by_all_threads() -> Result<()> {
    let threads = 4;
    let mut engine = ParallelEngine::with_threads(threads)?;
    let per_thread: Arc<Vec<AtomicUsize>> =
        Arc::new((0..threads).map(|_| AtomicUsize::new(0)).collect());
    let sink = per_thread.clone();

    engine.dispatch(400, move |first, count| {
        let mut rng = StdRng::seed_from_u64(first as u64);
        for _ in 0..count {
            std::thread::sleep(Duration::from_micros(rng.random_range(50..500)));
        }
        sink[current_worker_id()].fetch_add(count, Ordering::Relaxed);
        Ok(())
    })?;

    let counts: Vec<_> = per_thread
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .collect();
    assert_eq!(counts.iter().sum::<usize>(), 400);
    assert!(
        counts.iter().filter(|&&c| c > 0).count() >= 2,
        "work was not spread: {:?}",
        counts
    );
    Ok(())
}
