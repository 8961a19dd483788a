//! vantage-services — calculation nodes, invokers, the dispatcher and the
//! caches and codecs they share.

pub mod blacklist;
pub mod codec;
pub mod dispatcher;
pub mod function;
pub mod identifier;
pub mod invoker;
pub mod local_invoker;
pub mod node;
pub mod statistics;
pub mod view_cache;

pub use blacklist::{
    BlacklistRule, EmptyBlacklist, FunctionBlacklistMaintainer, FunctionBlacklistQuery, InMemoryBlacklist,
};
pub use codec::IdentifierSync;
pub use dispatcher::{DispatchError, JobDispatcher, JobOutcome};
pub use function::{
    CalcFunction, FnFunction, FunctionError, FunctionInputs, FunctionInvocation, FunctionRepository,
    InMemoryFunctionRepository,
};
pub use identifier::{IdentifierMap, InMemoryIdentifierMap};
pub use invoker::{InvocationFailure, JobInvocationReceiver, JobInvoker, Registration};
pub use local_invoker::LocalNodeInvoker;
pub use node::{next_node_id, node_id_with, CalculationNode};
pub use statistics::{FunctionStatistics, InvocationStatistics};
pub use view_cache::{CachePartition, ViewComputationCache, ViewComputationCacheSource};
