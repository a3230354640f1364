//! Monte-Carlo estimate of pi through both parallel layers.
//!
//! ```text
//! parallel_demo [THREADS] [SAMPLES] [RANKS]
//! ```
//!
//! Without `RANKS` the process-wide group is used (MPI with the `mpi` feature, a
//! group of one otherwise). With `RANKS` a local cluster of that many simulated
//! processes runs inside this process.

use anyhow::{ensure, Context, Result};
use parallel_core::engine::current_worker_id;
use parallel_core::{process, EngineConfig, LocalCluster, ParallelEngine, ProcessGroup};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

const DEFAULT_SAMPLES: usize = 1_000_000;
const SEED: u64 = 0x5EED_CAFE;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let threads = parse_arg(args.next(), "thread count")?.unwrap_or_else(num_cpus::get);
    let samples = parse_arg(args.next(), "sample count")?.unwrap_or(DEFAULT_SAMPLES);
    let ranks = parse_arg(args.next(), "rank count")?;
    ensure!(samples > 0, "Sample count must be greater than 0");

    match ranks {
        Some(ranks) => {
            let estimates =
                LocalCluster::new(ranks).run(|group| estimate_pi(&group, threads, samples))?;
            if let Some(Some(pi)) = estimates.first() {
                println!(
                    "pi ~ {:.6} ({} samples, {} simulated ranks x {} threads)",
                    pi, samples, ranks, threads
                );
            }
        }
        None => {
            let group = process::initialize()?;
            let estimate = estimate_pi(group, threads, samples)?;
            if let Some(pi) = estimate {
                println!(
                    "pi ~ {:.6} ({} samples, {} ranks x {} threads)",
                    pi,
                    samples,
                    group.size(),
                    threads
                );
            }
            process::finalize()?;
        }
    }

    Ok(())
}

fn parse_arg(arg: Option<String>, what: &str) -> Result<Option<usize>> {
    arg.map(|raw| {
        raw.parse::<usize>()
            .with_context(|| format!("Invalid {}: {:?}", what, raw))
    })
    .transpose()
}

/// Returns the estimate on the root rank and `None` elsewhere.
fn estimate_pi(group: &ProcessGroup, threads: usize, samples: usize) -> Result<Option<f64>> {
    let mut engine = ParallelEngine::new(EngineConfig::builder().thread_count(threads).build())?;

    // One tally per participant: [hits, samples]
    let tallies: Arc<Vec<Mutex<[f64; 2]>>> =
        Arc::new((0..threads).map(|_| Mutex::new([0.0; 2])).collect());
    let sink = tallies.clone();

    engine.dispatch_distributed(group, samples, move |first, count| {
        let mut rng = StdRng::seed_from_u64(SEED ^ first as u64);
        let mut hits = 0.0;
        for _ in 0..count {
            let (x, y): (f64, f64) = (rng.random(), rng.random());
            if x * x + y * y <= 1.0 {
                hits += 1.0;
            }
        }

        let mut tally = sink[current_worker_id()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tally[0] += hits;
        tally[1] += count as f64;
        Ok(())
    })?;

    let mut totals = [0.0; 2];
    for tally in tallies.iter() {
        let tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
        totals[0] += tally[0];
        totals[1] += tally[1];
    }

    group.sum_to_root(&mut totals)?;
    Ok(group.is_root().then(|| 4.0 * totals[0] / totals[1]))
}
