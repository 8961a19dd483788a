//! Vantage integration test harness.
//!
//! Every test builds its own in-process cluster: a function repository, a
//! cycle cache source, a local node pool and a dispatcher. Nothing is
//! shared between tests.
//!
//!   cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use vantage_core::config::TailPolicy;
use vantage_core::{
    ComputedValue, Job, JobItem, JobSpecification, TargetSpec, TargetType, Value, ValueDescriptor,
    ValueProperties, ValueRequest,
};
use vantage_services::{
    node_id_with, CachePartition, CalculationNode, FnFunction, FunctionError, FunctionInvocation,
    FunctionRepository, InMemoryFunctionRepository, JobDispatcher, LocalNodeInvoker,
    ViewComputationCacheSource,
};

mod capacity;
mod scenarios;
mod tails;
mod wire;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const VIEW: &str = "Equity View";
pub const CONFIG: &str = "Default";
pub const CYCLE: u64 = 42;

pub struct Cluster {
    pub functions: Arc<InMemoryFunctionRepository>,
    pub caches: Arc<ViewComputationCacheSource>,
    pub invoker: Arc<LocalNodeInvoker>,
    pub dispatcher: Arc<JobDispatcher>,
}

impl Cluster {
    pub fn new(nodes: usize) -> Self {
        Self::with_policy(nodes, TailPolicy::default(), Duration::from_secs(5))
    }

    pub fn with_policy(nodes: usize, policy: TailPolicy, timeout: Duration) -> Self {
        let functions = Arc::new(InMemoryFunctionRepository::new());
        register_test_functions(&functions);
        let caches = Arc::new(ViewComputationCacheSource::default());
        let invoker = Arc::new(LocalNodeInvoker::new("local", policy));
        let cluster = Self {
            functions,
            caches,
            invoker,
            dispatcher: Arc::new(JobDispatcher::new(timeout)),
        };
        for _ in 0..nodes {
            cluster.add_node();
        }
        cluster.dispatcher.add_invoker(cluster.invoker.clone());
        cluster
    }

    pub fn add_node(&self) {
        self.invoker.add_node(CalculationNode::new(
            node_id_with("it", "0"),
            self.caches.clone(),
            self.functions.clone(),
        ));
    }

    pub fn seed(&self, descriptor: &ValueDescriptor, value: Value) {
        self.caches
            .cache(CYCLE)
            .put(descriptor, value, CachePartition::Shared);
    }

    pub fn shared(&self, descriptor: &ValueDescriptor) -> Option<Value> {
        self.caches
            .cache(CYCLE)
            .get(descriptor, CachePartition::Shared)
            .map(|v| (*v).clone())
    }

    /// A job against the current function repository.
    pub fn job(&self, job_id: u64, items: Vec<JobItem>) -> Job {
        Job::new(spec(job_id), self.functions.last_reload(), items)
    }
}

pub fn spec(job_id: u64) -> JobSpecification {
    JobSpecification::new(VIEW, CONFIG, CYCLE, job_id)
}

pub fn security(id: &str) -> TargetSpec {
    TargetSpec::new(TargetType::Security, id)
}

pub fn market_data(name: &str, target: TargetSpec) -> ValueDescriptor {
    ValueDescriptor::new(name, target, "market_data", ValueProperties::none())
}

pub fn request(name: &str, target: TargetSpec) -> ValueRequest {
    ValueRequest::new(name, target, ValueProperties::none())
}

/// The descriptor `function_id` produces for `request`.
pub fn produced(request: &ValueRequest, function_id: &str) -> ValueDescriptor {
    request.resolve(function_id, request.constraints.clone())
}

/// Functions available in every cluster:
///   double — twice the first numeric input
///   fail   — always raises `CalibrationFailed`
///   slow   — sleeps 100 ms, then answers `true`
fn register_test_functions(repo: &InMemoryFunctionRepository) {
    repo.register(Arc::new(FnFunction::new("double", |inv: &FunctionInvocation| {
        let v = inv
            .inputs
            .iter()
            .find_map(|(_, v)| v.as_f64())
            .ok_or_else(|| FunctionError::new("NoNumericInput", "double needs a number"))?;
        Ok(answer(inv, Value::Double(v * 2.0)))
    })));
    repo.register(Arc::new(FnFunction::new("fail", |_: &FunctionInvocation| {
        Err(FunctionError::new("CalibrationFailed", "curve did not converge"))
    })));
    repo.register(Arc::new(FnFunction::new("slow", |inv: &FunctionInvocation| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(answer(inv, Value::Boolean(true)))
    })));
}

fn answer(inv: &FunctionInvocation, value: Value) -> Vec<ComputedValue> {
    inv.desired.iter().map(|r| inv.output(r, value.clone())).collect()
}
