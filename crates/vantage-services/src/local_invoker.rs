//! Local node invoker — runs jobs on a pool of in-process calculation nodes.
//!
//! Each accepted job takes one idle node and runs on a blocking worker
//! together with its tail jobs. When the worker finishes, the node goes
//! back to the pool and the first live waiting registration is signalled,
//! both under the pool lock, before any result is delivered. A node that
//! crashes is not returned and signals nobody.
//!
//! Workers run on the ambient tokio runtime's blocking pool; outside a
//! runtime `invoke` rejects every job.

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use vantage_core::config::TailPolicy;
use vantage_core::{InvocationOutcome, Job, JobResult, JobSpecification};

use crate::invoker::{InvocationFailure, JobInvocationReceiver, JobInvoker, Registration};
use crate::node::CalculationNode;
use crate::statistics::InvocationStatistics;

#[derive(Default)]
struct PoolState {
    idle: Vec<CalculationNode>,
    busy: usize,
    waiting: VecDeque<Registration>,
}

impl PoolState {
    /// Signal waiting registrations until one is still listening.
    fn notify_one(&mut self) -> bool {
        while let Some(registration) = self.waiting.pop_front() {
            if registration.notify() {
                return true;
            }
        }
        false
    }
}

enum Delivery {
    Completed(JobResult),
    Failed(JobSpecification, InvocationFailure),
}

pub struct LocalNodeInvoker {
    id: String,
    pool: Arc<Mutex<PoolState>>,
    tail_policy: TailPolicy,
    statistics: InvocationStatistics,
}

impl LocalNodeInvoker {
    pub fn new(id: impl Into<String>, tail_policy: TailPolicy) -> Self {
        Self {
            id: id.into(),
            pool: Arc::new(Mutex::new(PoolState::default())),
            tail_policy,
            statistics: InvocationStatistics::new(),
        }
    }

    /// Gatherer every added node reports into.
    pub fn statistics(&self) -> &InvocationStatistics {
        &self.statistics
    }

    /// Jobs any node of this pool ran against a reloaded function repository.
    pub fn stale_jobs(&self) -> u64 {
        self.statistics.stale_jobs()
    }

    /// Grow the pool by one node and wake at most one waiting registration.
    pub fn add_node(&self, node: CalculationNode) {
        let node = node.with_statistics(self.statistics.clone());
        let node_id = node.node_id().to_string();
        let mut pool = lock(&self.pool);
        pool.idle.push(node);
        let woke = pool.notify_one();
        tracing::debug!(invoker = %self.id, node = %node_id, woke, "node added");
    }

    /// Idle plus busy nodes.
    pub fn node_count(&self) -> usize {
        let pool = lock(&self.pool);
        pool.idle.len() + pool.busy
    }

    pub fn idle_count(&self) -> usize {
        lock(&self.pool).idle.len()
    }

    pub fn waiting_count(&self) -> usize {
        lock(&self.pool).waiting.len()
    }
}

impl JobInvoker for LocalNodeInvoker {
    fn invoker_id(&self) -> &str {
        &self.id
    }

    fn invoke(&self, job: Arc<Job>, receiver: Arc<dyn JobInvocationReceiver>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(invoker = %self.id, job = %job.specification, "no tokio runtime to run jobs on");
            return false;
        };
        let mut node = {
            let mut pool = lock(&self.pool);
            match pool.idle.pop() {
                Some(node) => {
                    pool.busy += 1;
                    node
                }
                None => return false,
            }
        };

        tracing::debug!(invoker = %self.id, job = %job.specification, node = %node.node_id(), "job accepted");

        let pool = self.pool.clone();
        let policy = self.tail_policy;
        let invoker_id = self.id.clone();
        runtime.spawn_blocking(move || {
            let mut deliveries = Vec::new();
            let run = catch_unwind(AssertUnwindSafe(|| run_chain(&mut node, &job, policy, &mut deliveries)));

            {
                let mut pool = lock(&pool);
                pool.busy -= 1;
                match run {
                    Ok(()) => {
                        pool.idle.push(node);
                        pool.notify_one();
                    }
                    Err(_) => {
                        tracing::error!(invoker = %invoker_id, node = %node.node_id(), job = %job.specification, "node crashed");
                        crashed(&job, node.node_id(), &mut deliveries);
                        // The node is dropped; its slot is not coming back.
                        drop(node);
                    }
                }
            }

            for delivery in deliveries {
                match delivery {
                    Delivery::Completed(result) => receiver.job_completed(result),
                    Delivery::Failed(spec, failure) => receiver.job_failed(&spec, failure),
                }
            }
        });
        true
    }

    fn notify_when_available(&self, registration: Registration) -> bool {
        let mut pool = lock(&self.pool);
        if !pool.idle.is_empty() {
            return true;
        }
        pool.waiting.push_back(registration);
        false
    }
}

fn lock(pool: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    // A poisoned pool only means a worker panicked while holding the lock;
    // the state itself is still consistent.
    pool.lock().unwrap_or_else(|e| e.into_inner())
}

fn tail_allowed(policy: TailPolicy, parent: &JobResult) -> bool {
    match policy {
        TailPolicy::AllSucceeded => parent.all_succeeded(),
        TailPolicy::NoExceptions => !parent
            .items
            .iter()
            .any(|i| i.outcome == InvocationOutcome::FunctionThrewException),
    }
}

/// Run `job` then its tails, depth-first, recording every outcome.
fn run_chain(node: &mut CalculationNode, job: &Job, policy: TailPolicy, out: &mut Vec<Delivery>) {
    let result = node.execute_job(job);
    let run_tails = tail_allowed(policy, &result);
    out.push(Delivery::Completed(result));
    for tail in &job.tail {
        if run_tails {
            run_chain(node, tail, policy, out);
        } else {
            skip_chain(tail, &job.specification, out);
        }
    }
}

fn skip_chain(job: &Job, parent: &JobSpecification, out: &mut Vec<Delivery>) {
    tracing::info!(job = %job.specification, parent = %parent, "tail job skipped");
    out.push(Delivery::Failed(
        job.specification.clone(),
        InvocationFailure::TailSkipped { parent: parent.clone() },
    ));
    for tail in &job.tail {
        skip_chain(tail, &job.specification, out);
    }
}

/// Fail every job of the chain that has no outcome yet.
fn crashed(job: &Job, node_id: &str, out: &mut Vec<Delivery>) {
    let reported: HashSet<JobSpecification> = out
        .iter()
        .map(|d| match d {
            Delivery::Completed(r) => r.specification.clone(),
            Delivery::Failed(spec, _) => spec.clone(),
        })
        .collect();
    for j in job.chain() {
        if !reported.contains(&j.specification) {
            out.push(Delivery::Failed(
                j.specification.clone(),
                InvocationFailure::NodeCrashed {
                    node_id: node_id.to_string(),
                },
            ));
        }
    }
}
