//! Calculation node — executes one job at a time against a cycle's cache.
//!
//! Items run strictly in job order. A failing item never stops the job:
//! its outcome is recorded and the next item runs. Only values that satisfy
//! one of the item's desired requests are written to the cache.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use vantage_core::{
    ComputedValue, ExceptionInfo, Job, JobItem, JobResult, JobSpecification, ResultItem, ValueRequest,
};

use crate::blacklist::{EmptyBlacklist, FunctionBlacklistMaintainer, FunctionBlacklistQuery};
use crate::function::{FunctionError, FunctionInputs, FunctionInvocation, FunctionRepository};
use crate::statistics::InvocationStatistics;
use crate::view_cache::{ViewComputationCache, ViewComputationCacheSource};

static NODE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `"{host}/{VANTAGE_NODE_ID or 0}/{n}"`, `n` unique within the process.
pub fn next_node_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let instance = std::env::var("VANTAGE_NODE_ID").unwrap_or_else(|_| "0".to_string());
    node_id_with(&host, &instance)
}

/// Like `next_node_id` with explicit host and instance components.
pub fn node_id_with(host: &str, instance: &str) -> String {
    let n = NODE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{host}/{instance}/{n}")
}

pub struct CalculationNode {
    node_id: String,
    cache_source: Arc<ViewComputationCacheSource>,
    functions: Arc<dyn FunctionRepository>,
    statistics: InvocationStatistics,
    blacklist_query: Arc<dyn FunctionBlacklistQuery>,
    blacklist_update: Arc<dyn FunctionBlacklistMaintainer>,
}

impl CalculationNode {
    pub fn new(
        node_id: impl Into<String>,
        cache_source: Arc<ViewComputationCacheSource>,
        functions: Arc<dyn FunctionRepository>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            cache_source,
            functions,
            statistics: InvocationStatistics::new(),
            blacklist_query: Arc::new(EmptyBlacklist),
            blacklist_update: Arc::new(EmptyBlacklist),
        }
    }

    /// Consult `query` before each item and report raising items to `update`.
    pub fn with_blacklist(
        mut self,
        query: Arc<dyn FunctionBlacklistQuery>,
        update: Arc<dyn FunctionBlacklistMaintainer>,
    ) -> Self {
        self.blacklist_query = query;
        self.blacklist_update = update;
        self
    }

    /// Report into a shared gatherer instead of a private one.
    pub fn with_statistics(mut self, statistics: InvocationStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn statistics(&self) -> &InvocationStatistics {
        &self.statistics
    }

    /// Jobs seen that were built against an older function repository,
    /// counted in the statistics gatherer.
    pub fn stale_jobs(&self) -> u64 {
        self.statistics.stale_jobs()
    }

    /// Run every item of `job` and report one outcome per item.
    pub fn execute_job(&mut self, job: &Job) -> JobResult {
        let start = Instant::now();
        let spec = &job.specification;

        let reloaded = self.functions.last_reload();
        if job.function_repo_timestamp < reloaded {
            self.statistics.record_stale_job();
            tracing::warn!(
                job = %spec,
                built_against = job.function_repo_timestamp,
                reloaded,
                "function repository reloaded since job was built"
            );
        }

        let cache = self.cache_source.cache(spec.cycle_id);
        let items = job
            .items
            .iter()
            .enumerate()
            .map(|(idx, item)| self.execute_item(&cache, job, idx, item))
            .collect::<Vec<_>>();

        let released = cache.release_private(spec);
        let duration = start.elapsed();

        let result = JobResult {
            specification: spec.clone(),
            duration,
            items,
            node_id: self.node_id.clone(),
        };
        tracing::info!(
            job = %spec,
            node = %self.node_id,
            items = result.items.len(),
            ok = result.all_succeeded(),
            private_released = released,
            elapsed_ms = duration.as_millis() as u64,
            "job executed"
        );
        result
    }

    fn execute_item(&self, cache: &ViewComputationCache, job: &Job, idx: usize, item: &JobItem) -> ResultItem {
        let spec = &job.specification;

        if self.blacklist_query.is_blacklisted(item) {
            tracing::info!(job = %spec, item = idx, function_id = %item.function_id, "item suppressed by blacklist");
            return ResultItem::not_satisfied(idx);
        }

        // ── Inputs ──
        let mut seen = HashSet::with_capacity(item.inputs.len());
        let wanted: Vec<_> = item.inputs.iter().filter(|d| seen.insert(*d)).cloned().collect();
        let fetched = cache.get_values(&wanted, spec, &job.cache_hint);
        let mut inputs = Vec::with_capacity(wanted.len());
        let mut missing = Vec::new();
        for (descriptor, value) in wanted.into_iter().zip(fetched) {
            match value {
                Some(v) => inputs.push((descriptor, v)),
                None => missing.push(descriptor),
            }
        }
        if !missing.is_empty() {
            tracing::debug!(job = %spec, item = idx, missing = missing.len(), "inputs missing");
            return ResultItem::missing_inputs(idx, missing);
        }

        // ── Function ──
        let Some(function) = self.functions.resolve(&item.function_id) else {
            tracing::warn!(job = %spec, item = idx, function_id = %item.function_id, "function not found");
            return ResultItem::not_satisfied(idx);
        };

        // ── Invoke ──
        let input_count = inputs.len();
        let invocation = FunctionInvocation {
            function_id: item.function_id.clone(),
            target: item.target.clone(),
            inputs: FunctionInputs::new(inputs),
            desired: item.desired.clone(),
        };
        let started = Instant::now();
        // `can_produce` is function code too, so it runs under the same guard.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            match item.desired.iter().find(|r| !function.can_produce(&item.target, r)) {
                Some(request) => Invoked::Rejected(request.clone()),
                None => Invoked::Ran(function.execute(&invocation)),
            }
        }));

        let produced = match outcome {
            Ok(Invoked::Rejected(request)) => {
                tracing::warn!(
                    job = %spec,
                    item = idx,
                    function_id = %item.function_id,
                    request = %request,
                    "function cannot produce requested value"
                );
                return ResultItem::not_satisfied(idx);
            }
            Ok(Invoked::Ran(Ok(values))) => {
                self.record(spec, item, started, input_count);
                values
            }
            Ok(Invoked::Ran(Err(err))) => {
                self.record(spec, item, started, input_count);
                tracing::warn!(job = %spec, item = idx, function_id = %item.function_id, error = %err, "function failed");
                self.blacklist_update.failed_job_item(item);
                return ResultItem::exception(idx, err.into());
            }
            Err(payload) => {
                self.record(spec, item, started, input_count);
                let message = panic_message(payload.as_ref());
                tracing::warn!(job = %spec, item = idx, function_id = %item.function_id, %message, "function panicked");
                self.blacklist_update.failed_job_item(item);
                return ResultItem::exception(
                    idx,
                    ExceptionInfo {
                        kind: "panic".to_string(),
                        message,
                        stack_trace: String::new(),
                    },
                );
            }
        };

        // ── Outputs ──
        let (kept, missing_outputs) = select_outputs(spec, idx, produced, &item.desired);
        cache.put_values(kept, spec, &job.cache_hint);
        ResultItem::success(idx, missing_outputs)
    }

    fn record(&self, spec: &JobSpecification, item: &JobItem, started: Instant, input_count: usize) {
        self.statistics
            .record(&spec.calc_config_name, &item.function_id, started.elapsed(), input_count);
    }
}

enum Invoked {
    Rejected(ValueRequest),
    Ran(Result<Vec<ComputedValue>, FunctionError>),
}

/// Split produced values into those answering a desired request and the
/// requests left unanswered.
fn select_outputs(
    spec: &JobSpecification,
    idx: usize,
    produced: Vec<ComputedValue>,
    desired: &[ValueRequest],
) -> (Vec<ComputedValue>, Vec<ValueRequest>) {
    let mut answered = vec![false; desired.len()];
    let mut kept = Vec::with_capacity(produced.len());
    for value in produced {
        let mut wanted = false;
        for (i, request) in desired.iter().enumerate() {
            if value.descriptor.satisfies(request) {
                answered[i] = true;
                wanted = true;
            }
        }
        if wanted {
            kept.push(value);
        } else {
            tracing::debug!(job = %spec, item = idx, descriptor = %value.descriptor, "unrequested output dropped");
        }
    }
    let missing = desired
        .iter()
        .zip(answered)
        .filter(|(_, ok)| !ok)
        .map(|(r, _)| r.clone())
        .collect();
    (kept, missing)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}
