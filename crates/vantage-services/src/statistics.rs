use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-function counters for one calc config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionStatistics {
    pub calc_config_name: String,
    pub function_id: String,
    pub invocations: u64,
    pub total_nanos: u64,
    /// Input values handed to the function across all invocations.
    pub input_values: u64,
}

impl FunctionStatistics {
    pub fn mean(&self) -> Duration {
        if self.invocations == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_nanos / self.invocations)
    }
}

#[derive(Debug, Default)]
struct Counters {
    invocations: u64,
    total_nanos: u64,
    input_values: u64,
}

/// Invocation statistics gathered by every node of a pool.
#[derive(Clone, Default)]
pub struct InvocationStatistics {
    /// (calc_config_name, function_id) → counters
    counters: Arc<DashMap<(String, String), Counters>>,
    stale_jobs: Arc<AtomicU64>,
}

impl InvocationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation.
    pub fn record(&self, calc_config_name: &str, function_id: &str, elapsed: Duration, input_values: usize) {
        let mut c = self
            .counters
            .entry((calc_config_name.to_string(), function_id.to_string()))
            .or_default();
        c.invocations += 1;
        c.total_nanos = c.total_nanos.saturating_add(elapsed.as_nanos() as u64);
        c.input_values += input_values as u64;
    }

    /// Counters for every (calc config, function), sorted.
    pub fn snapshot(&self) -> Vec<FunctionStatistics> {
        let mut out: Vec<FunctionStatistics> = self
            .counters
            .iter()
            .map(|e| {
                let (config, function) = e.key();
                FunctionStatistics {
                    calc_config_name: config.clone(),
                    function_id: function.clone(),
                    invocations: e.invocations,
                    total_nanos: e.total_nanos,
                    input_values: e.input_values,
                }
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.calc_config_name, &a.function_id).cmp(&(&b.calc_config_name, &b.function_id))
        });
        out
    }

    pub fn total_invocations(&self) -> u64 {
        self.counters.iter().map(|e| e.invocations).sum()
    }

    /// Count a job built against a function repository that has since been
    /// reloaded.
    pub fn record_stale_job(&self) {
        self.stale_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_jobs(&self) -> u64 {
        self.stale_jobs.load(Ordering::Relaxed)
    }
}
