//! Function repository — resolves a function id to an executable function.
//!
//! Functions are plain trait objects. A node asks the repository for
//! `function_id`, hands it the item's target, resolved inputs and desired
//! outputs, and caches whatever it returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use vantage_core::{ComputedValue, ExceptionInfo, TargetSpec, Value, ValueDescriptor, ValueRequest};

// ── Invocation ────────────────────────────────────────────────────────────────

/// Resolved inputs of one invocation, in job order.
#[derive(Debug, Clone, Default)]
pub struct FunctionInputs {
    values: Vec<(ValueDescriptor, Arc<Value>)>,
}

impl FunctionInputs {
    pub fn new(values: Vec<(ValueDescriptor, Arc<Value>)>) -> Self {
        Self { values }
    }

    pub fn get(&self, descriptor: &ValueDescriptor) -> Option<&Value> {
        self.values
            .iter()
            .find(|(d, _)| d == descriptor)
            .map(|(_, v)| v.as_ref())
    }

    /// First input whose value name is `name`.
    pub fn by_name(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(d, _)| d.value_name == name)
            .map(|(_, v)| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValueDescriptor, &Value)> {
        self.values.iter().map(|(d, v)| (d, v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything a function sees when invoked.
#[derive(Debug, Clone)]
pub struct FunctionInvocation {
    pub function_id: String,
    pub target: TargetSpec,
    pub inputs: FunctionInputs,
    pub desired: Vec<ValueRequest>,
}

impl FunctionInvocation {
    /// Resolve `request` against this invocation's function.
    pub fn output(&self, request: &ValueRequest, value: Value) -> ComputedValue {
        let properties = request.constraints.clone();
        ComputedValue::new(request.resolve(self.function_id.clone(), properties), value)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure raised by a function. Carried into the job result verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionError {
    pub kind: String,
    pub message: String,
    pub trace: String,
}

impl FunctionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: String::new(),
        }
    }

    /// Capture any error, using its type name as the kind and its source
    /// chain as the trace.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(s) = source {
            trace.push(format!("caused by: {s}"));
            source = s.source();
        }
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
            trace: trace.join("\n"),
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<FunctionError> for ExceptionInfo {
    fn from(e: FunctionError) -> Self {
        ExceptionInfo {
            kind: e.kind,
            message: e.message,
            stack_trace: e.trace,
        }
    }
}

// ── Functions ─────────────────────────────────────────────────────────────────

pub trait CalcFunction: Send + Sync {
    fn function_id(&self) -> &str;

    /// Whether this function can produce `request` for `target`.
    fn can_produce(&self, _target: &TargetSpec, _request: &ValueRequest) -> bool {
        true
    }

    fn execute(&self, invocation: &FunctionInvocation) -> Result<Vec<ComputedValue>, FunctionError>;
}

type ExecuteFn = dyn Fn(&FunctionInvocation) -> Result<Vec<ComputedValue>, FunctionError> + Send + Sync;

/// Adapts a closure into a `CalcFunction`.
pub struct FnFunction {
    id: String,
    f: Box<ExecuteFn>,
}

impl FnFunction {
    pub fn new<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&FunctionInvocation) -> Result<Vec<ComputedValue>, FunctionError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            f: Box::new(f),
        }
    }
}

impl CalcFunction for FnFunction {
    fn function_id(&self) -> &str {
        &self.id
    }

    fn execute(&self, invocation: &FunctionInvocation) -> Result<Vec<ComputedValue>, FunctionError> {
        (self.f)(invocation)
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

pub trait FunctionRepository: Send + Sync {
    fn resolve(&self, function_id: &str) -> Option<Arc<dyn CalcFunction>>;

    /// Timestamp of the last reload. Jobs built before it are stale.
    fn last_reload(&self) -> u64;
}

/// Functions registered in process.
#[derive(Default)]
pub struct InMemoryFunctionRepository {
    functions: RwLock<HashMap<String, Arc<dyn CalcFunction>>>,
    reloaded: AtomicU64,
}

impl InMemoryFunctionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a function. Counts as a reload.
    pub fn register(&self, function: Arc<dyn CalcFunction>) {
        let id = function.function_id().to_string();
        let mut functions = self.functions.write().unwrap_or_else(|e| e.into_inner());
        functions.insert(id.clone(), function);
        let ts = self.reloaded.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(function_id = %id, reload = ts, "function registered");
    }

    pub fn function_ids(&self) -> Vec<String> {
        let functions = self.functions.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = functions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl FunctionRepository for InMemoryFunctionRepository {
    fn resolve(&self, function_id: &str) -> Option<Arc<dyn CalcFunction>> {
        let functions = self.functions.read().unwrap_or_else(|e| e.into_inner());
        functions.get(function_id).cloned()
    }

    fn last_reload(&self) -> u64 {
        self.reloaded.load(Ordering::Acquire)
    }
}
