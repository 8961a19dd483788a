//! Job model — a unit of work handed to a calculation node and its outcome.
//!
//! All types here are immutable values. A `Job` is built once upstream of
//! the dispatcher; a `JobResult` is built once by the node that ran it.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::{TargetSpec, ValueDescriptor, ValueRequest};

// ── Identity ──────────────────────────────────────────────────────────────────

/// Composite identity of a job. Two jobs with equal specifications are the
/// same job for caching and addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobSpecification {
    pub view_name: String,
    pub calc_config_name: String,
    pub cycle_id: u64,
    pub job_id: u64,
}

impl JobSpecification {
    pub fn new(
        view_name: impl Into<String>,
        calc_config_name: impl Into<String>,
        cycle_id: u64,
        job_id: u64,
    ) -> Self {
        Self {
            view_name: view_name.into(),
            calc_config_name: calc_config_name.into(),
            cycle_id,
            job_id,
        }
    }

    /// Same view, config and cycle with a different job id.
    pub fn sibling(&self, job_id: u64) -> Self {
        Self {
            job_id,
            ..self.clone()
        }
    }
}

impl fmt::Display for JobSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.view_name, self.calc_config_name, self.cycle_id, self.job_id
        )
    }
}

// ── Items ─────────────────────────────────────────────────────────────────────

/// One function invocation within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItem {
    pub function_id: String,
    pub target: TargetSpec,
    /// A set kept in order; nodes ignore repeats.
    #[serde(default)]
    pub inputs: Vec<ValueDescriptor>,
    #[serde(default)]
    pub desired: Vec<ValueRequest>,
}

impl JobItem {
    pub fn new(
        function_id: impl Into<String>,
        target: TargetSpec,
        inputs: Vec<ValueDescriptor>,
        desired: Vec<ValueRequest>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            target,
            inputs,
            desired,
        }
    }
}

// ── Cache hint ────────────────────────────────────────────────────────────────

/// Which cache partition each descriptor of a job lives in.
///
/// Only the smaller side is listed: either the private descriptors (all
/// others shared) or the shared descriptors (all others private).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum CacheSelectHint {
    /// Listed descriptors are private, everything else is shared.
    PrivateValues(BTreeSet<ValueDescriptor>),
    /// Listed descriptors are shared, everything else is private.
    SharedValues(BTreeSet<ValueDescriptor>),
}

impl Default for CacheSelectHint {
    fn default() -> Self {
        Self::all_shared()
    }
}

impl CacheSelectHint {
    pub fn all_shared() -> Self {
        Self::PrivateValues(BTreeSet::new())
    }

    pub fn all_private() -> Self {
        Self::SharedValues(BTreeSet::new())
    }

    /// Build a hint for a job touching `all` descriptors of which `private`
    /// are job-local, listing whichever side is smaller.
    pub fn for_values<'a>(
        all: impl IntoIterator<Item = &'a ValueDescriptor>,
        private: &BTreeSet<ValueDescriptor>,
    ) -> Self {
        let shared: BTreeSet<ValueDescriptor> = all
            .into_iter()
            .filter(|d| !private.contains(*d))
            .cloned()
            .collect();
        if private.len() <= shared.len() {
            Self::PrivateValues(private.clone())
        } else {
            Self::SharedValues(shared)
        }
    }

    pub fn is_private(&self, descriptor: &ValueDescriptor) -> bool {
        match self {
            Self::PrivateValues(listed) => listed.contains(descriptor),
            Self::SharedValues(listed) => !listed.contains(descriptor),
        }
    }

    /// The explicitly listed descriptors, whichever polarity they have.
    pub fn listed(&self) -> &BTreeSet<ValueDescriptor> {
        match self {
            Self::PrivateValues(listed) | Self::SharedValues(listed) => listed,
        }
    }

    /// True when the listed descriptors are the private ones.
    pub fn lists_private(&self) -> bool {
        matches!(self, Self::PrivateValues(_))
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

/// A batch of function invocations for one calc config of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub specification: JobSpecification,
    /// Reload timestamp of the function repository the job was built against.
    pub function_repo_timestamp: u64,
    pub items: Vec<JobItem>,
    #[serde(default)]
    pub cache_hint: CacheSelectHint,
    /// Jobs to run on the same node once this one completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tail: Vec<Job>,
}

impl Job {
    pub fn new(specification: JobSpecification, function_repo_timestamp: u64, items: Vec<JobItem>) -> Self {
        Self {
            specification,
            function_repo_timestamp,
            items,
            cache_hint: CacheSelectHint::default(),
            tail: Vec::new(),
        }
    }

    pub fn with_cache_hint(mut self, hint: CacheSelectHint) -> Self {
        self.cache_hint = hint;
        self
    }

    pub fn with_tail(mut self, job: Job) -> Self {
        self.tail.push(job);
        self
    }

    /// This job followed by all tail jobs, depth-first.
    pub fn chain(&self) -> Vec<&Job> {
        let mut out = vec![self];
        for t in &self.tail {
            out.extend(t.chain());
        }
        out
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job[{}, {} items]", self.specification, self.items.len())
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Classification of a single job item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationOutcome {
    Success,
    MissingInputs,
    FunctionThrewException,
    /// No function could be resolved to produce a desired output.
    NotSatisfied,
}

/// Error captured from a failed function invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Position of the corresponding item in the job.
    pub item_index: usize,
    pub outcome: InvocationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_inputs: Vec<ValueDescriptor>,
    /// Desired values a successful invocation did not produce.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_outputs: Vec<ValueRequest>,
}

impl ResultItem {
    pub fn success(item_index: usize, missing_outputs: Vec<ValueRequest>) -> Self {
        Self {
            item_index,
            outcome: InvocationOutcome::Success,
            exception: None,
            missing_inputs: Vec::new(),
            missing_outputs,
        }
    }

    pub fn missing_inputs(item_index: usize, missing: Vec<ValueDescriptor>) -> Self {
        Self {
            item_index,
            outcome: InvocationOutcome::MissingInputs,
            exception: None,
            missing_inputs: missing,
            missing_outputs: Vec::new(),
        }
    }

    pub fn exception(item_index: usize, exception: ExceptionInfo) -> Self {
        Self {
            item_index,
            outcome: InvocationOutcome::FunctionThrewException,
            exception: Some(exception),
            missing_inputs: Vec::new(),
            missing_outputs: Vec::new(),
        }
    }

    pub fn not_satisfied(item_index: usize) -> Self {
        Self {
            item_index,
            outcome: InvocationOutcome::NotSatisfied,
            exception: None,
            missing_inputs: Vec::new(),
            missing_outputs: Vec::new(),
        }
    }
}

/// Outcome of one executed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub specification: JobSpecification,
    pub duration: Duration,
    pub items: Vec<ResultItem>,
    pub node_id: String,
}

impl JobResult {
    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(|i| i.outcome == InvocationOutcome::Success)
    }

    pub fn has_exceptions(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.outcome == InvocationOutcome::FunctionThrewException)
    }

    pub fn count(&self, outcome: InvocationOutcome) -> usize {
        self.items.iter().filter(|i| i.outcome == outcome).count()
    }
}
