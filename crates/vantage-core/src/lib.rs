//! vantage-core — value identity, job model, wire shapes and configuration.
//! All other Vantage crates depend on this one.

pub mod config;
pub mod job;
pub mod value;
pub mod wire;

pub use job::{
    CacheSelectHint, ExceptionInfo, InvocationOutcome, Job, JobItem, JobResult, JobSpecification,
    ResultItem,
};
pub use value::{
    ComputedValue, TargetSpec, TargetType, Value, ValueDescriptor, ValueHandle, ValueProperties,
    ValueRequest,
};
