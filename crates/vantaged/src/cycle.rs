//! Cycle files — seed values plus staged jobs, run through the dispatcher.
//!
//! Jobs within a stage are dispatched concurrently; stages run in order, so
//! a later stage may consume what an earlier one wrote to the shared cache.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Deserialize;
use vantage_core::wire::WireMessage;
use vantage_core::{ComputedValue, Job};
use vantage_services::codec::encode_result;
use vantage_services::{
    CachePartition, DispatchError, IdentifierSync, JobDispatcher, ViewComputationCacheSource,
};

#[derive(Debug, Deserialize)]
pub struct CycleFile {
    pub cycle_id: u64,
    /// Values placed in the shared cache before any job runs.
    #[serde(default)]
    pub seed: Vec<ComputedValue>,
    pub stages: Vec<Vec<Job>>,
}

impl CycleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Run every stage of `cycle`, writing one wire frame per line to `out`.
pub async fn run(
    cycle: CycleFile,
    function_repo_timestamp: u64,
    dispatcher: &JobDispatcher,
    caches: &ViewComputationCacheSource,
    out: &mut impl Write,
) -> Result<CycleSummary> {
    let cache = caches.cache(cycle.cycle_id);
    for seed in &cycle.seed {
        cache.put(&seed.descriptor, seed.value.clone(), CachePartition::Shared);
    }
    tracing::info!(cycle_id = cycle.cycle_id, seeded = cycle.seed.len(), stages = cycle.stages.len(), "cycle started");

    let mut sync = IdentifierSync::new();
    let mut summary = CycleSummary::default();

    for (stage, jobs) in cycle.stages.into_iter().enumerate() {
        let dispatches = jobs.into_iter().map(|mut job| {
            stamp(&mut job, cycle.cycle_id, function_repo_timestamp);
            dispatcher.dispatch_all(job)
        });
        let placed = futures::future::join_all(dispatches).await;

        for outcomes in placed {
            for outcome in flatten(outcomes) {
                match outcome {
                    Ok(result) => {
                        summary.completed += 1;
                        let message = WireMessage::JobResult(encode_result(&result, caches.identifiers().as_ref()));
                        for frame in sync.frames(&message, caches.identifiers().as_ref())? {
                            write_frame(out, &frame)?;
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(stage, error = %e, "job failed");
                    }
                }
            }
        }
        tracing::info!(stage, completed = summary.completed, failed = summary.failed, "stage finished");
    }

    caches.release_cycle(cycle.cycle_id);
    Ok(summary)
}

/// Jobs carry the file's cycle id; a zero timestamp means "current".
fn stamp(job: &mut Job, cycle_id: u64, function_repo_timestamp: u64) {
    job.specification.cycle_id = cycle_id;
    if job.function_repo_timestamp == 0 {
        job.function_repo_timestamp = function_repo_timestamp;
    }
    for tail in &mut job.tail {
        stamp(tail, cycle_id, function_repo_timestamp);
    }
}

fn flatten(
    placed: Result<Vec<vantage_services::JobOutcome>, DispatchError>,
) -> Vec<vantage_services::JobOutcome> {
    match placed {
        Ok(outcomes) => outcomes,
        Err(e) => vec![Err(e)],
    }
}

fn write_frame(out: &mut impl Write, frame: &Bytes) -> Result<()> {
    out.write_all(frame)?;
    out.write_all(b"\n")?;
    Ok(())
}
