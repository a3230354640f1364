use anyhow::Result;
use parallel_core::{Chunk, ParallelEngine};
use std::sync::{Arc, Mutex};

/// Runs one dispatch and returns every chunk the callback saw.
pub fn record_chunks(engine: &mut ParallelEngine, max_index: usize) -> Result<Vec<Chunk>> {
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    engine.dispatch(max_index, move |first, count| {
        sink.lock().unwrap().push(Chunk { first, count });
        Ok(())
    })?;
    let mut chunks = Arc::try_unwrap(chunks).unwrap().into_inner().unwrap();
    chunks.sort_by_key(|chunk| chunk.first);
    Ok(chunks)
}

/// Checks that sorted `chunks` are non-empty and tile `[0, max_index)` exactly.
pub fn assert_partition(chunks: &[Chunk], max_index: usize) {
    let mut next = 0;
    for chunk in chunks {
        assert!(chunk.count > 0, "empty chunk {:?}", chunk);
        assert_eq!(chunk.first, next, "gap or overlap before {:?}", chunk);
        next = chunk.end();
    }
    assert_eq!(next, max_index, "chunks stop at {} instead of {}", next, max_index);
}

/// Buffer of `len` values unique to `rank`.
pub fn rank_pattern(rank: usize, len: usize) -> Vec<f64> {
    (0..len).map(|i| (rank * 1_000 + i) as f64 * 0.5).collect()
}
