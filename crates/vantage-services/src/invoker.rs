//! Invoker protocol — the contract between the dispatcher and whatever
//! runs jobs (a local node pool, a remote peer).
//!
//! `invoke` never blocks. When an invoker has no free capacity it says so,
//! and the caller may leave a `Registration` to be told when capacity
//! appears. A registration is signalled at most once.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use vantage_core::{Job, JobResult, JobSpecification};

/// Why an accepted job produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    /// The node running the job died; nothing was computed.
    NodeCrashed { node_id: String },
    /// A tail job that was not run because its parent did not qualify.
    TailSkipped { parent: JobSpecification },
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationFailure::NodeCrashed { node_id } => write!(f, "node {node_id} crashed"),
            InvocationFailure::TailSkipped { parent } => write!(f, "skipped after parent {parent}"),
        }
    }
}

/// Receives the outcome of every job an invoker accepted, tail jobs included.
pub trait JobInvocationReceiver: Send + Sync {
    fn job_completed(&self, result: JobResult);

    fn job_failed(&self, specification: &JobSpecification, failure: InvocationFailure);
}

/// One-shot capacity signal left with an invoker.
#[derive(Debug)]
pub struct Registration {
    tx: oneshot::Sender<()>,
}

impl Registration {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Signal the registrant. False when nobody is listening any more, in
    /// which case the capacity should go to the next registration.
    pub fn notify(self) -> bool {
        self.tx.send(()).is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

pub trait JobInvoker: Send + Sync {
    fn invoker_id(&self) -> &str;

    /// Try to start `job`. True when accepted; the outcome then arrives at
    /// `receiver`. False when there is no free capacity. Called from within
    /// a tokio runtime; implementations may spawn onto it.
    fn invoke(&self, job: Arc<Job>, receiver: Arc<dyn JobInvocationReceiver>) -> bool;

    /// True when capacity is free right now; `registration` is dropped
    /// unsignalled and the caller should retry `invoke`. Otherwise the
    /// registration is queued and signalled once capacity appears.
    fn notify_when_available(&self, registration: Registration) -> bool;
}
