//! Job dispatcher — places jobs on registered invokers.
//!
//! A job goes to the first invoker that accepts it. When none does, the
//! dispatcher leaves at most one registration with each invoker and waits
//! for any of them to report capacity, retrying until the configured
//! timeout. A registration lives only while some dispatch is waiting; once
//! none is, it is dropped so the invoker hands its capacity to the next
//! registrant. Once a job is accepted the dispatcher only relays its outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use vantage_core::config::DispatcherConfig;
use vantage_core::{Job, JobResult, JobSpecification};

use crate::invoker::{InvocationFailure, JobInvocationReceiver, JobInvoker, Registration};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no invoker accepted job {job} within {timeout:?}")]
    Timeout { job: JobSpecification, timeout: Duration },
    #[error("job {job} failed: {failure}")]
    InvocationFailed {
        job: JobSpecification,
        failure: InvocationFailure,
    },
    #[error("job {job} was accepted but its outcome was never reported")]
    Abandoned { job: JobSpecification },
}

/// Outcome of one job of a dispatched chain.
pub type JobOutcome = Result<JobResult, DispatchError>;

struct RegisteredInvoker {
    invoker: Arc<dyn JobInvoker>,
    /// Set while a registration of ours is queued with this invoker.
    armed: Arc<AtomicBool>,
}

pub struct JobDispatcher {
    invokers: RwLock<Vec<RegisteredInvoker>>,
    /// Bumped whenever any invoker may have gained capacity.
    capacity: Arc<watch::Sender<u64>>,
    timeout: Duration,
}

impl JobDispatcher {
    pub fn new(timeout: Duration) -> Self {
        let (capacity, _) = watch::channel(0);
        Self {
            invokers: RwLock::new(Vec::new()),
            capacity: Arc::new(capacity),
            timeout,
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(config.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register an invoker. Dispatches waiting for capacity retry at once.
    pub fn add_invoker(&self, invoker: Arc<dyn JobInvoker>) {
        let id = invoker.invoker_id().to_string();
        {
            let mut invokers = self.invokers.write().unwrap_or_else(|e| e.into_inner());
            invokers.push(RegisteredInvoker {
                invoker,
                armed: Arc::new(AtomicBool::new(false)),
            });
        }
        self.capacity.send_modify(|n| *n = n.wrapping_add(1));
        tracing::info!(invoker = %id, "invoker registered");
    }

    pub fn invoker_count(&self) -> usize {
        self.invokers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run `job` and return its own result. Tail jobs still run, but their
    /// outcomes are discarded; use `dispatch_all` to collect them.
    pub async fn dispatch(&self, job: Job) -> JobOutcome {
        let job = Arc::new(job);
        let (receiver, mut pending) = DispatchReceiver::for_job(&job);
        self.place(job.clone(), receiver).await?;
        // The root job is always first in the chain.
        let (spec, rx) = pending.swap_remove(0);
        drop(pending);
        rx.await.unwrap_or(Err(DispatchError::Abandoned { job: spec }))
    }

    /// Run `job` and return the outcome of the root and every tail job,
    /// in pre-order.
    pub async fn dispatch_all(&self, job: Job) -> Result<Vec<JobOutcome>, DispatchError> {
        let job = Arc::new(job);
        let (receiver, pending) = DispatchReceiver::for_job(&job);
        self.place(job.clone(), receiver).await?;

        let mut outcomes = Vec::with_capacity(pending.len());
        for (spec, rx) in pending {
            let outcome = rx.await.unwrap_or(Err(DispatchError::Abandoned { job: spec }));
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn place(&self, job: Arc<Job>, receiver: Arc<dyn JobInvocationReceiver>) -> Result<(), DispatchError> {
        let deadline = Instant::now() + self.timeout;
        let mut capacity = self.capacity.subscribe();
        let mut attempts = 0u32;

        loop {
            let _seen = *capacity.borrow_and_update();
            attempts += 1;
            let invokers = self.snapshot();

            for (invoker, _) in &invokers {
                if invoker.invoke(job.clone(), receiver.clone()) {
                    tracing::debug!(
                        job = %job.specification,
                        invoker = %invoker.invoker_id(),
                        attempts,
                        "job dispatched"
                    );
                    return Ok(());
                }
            }

            if self.arm(&invokers) {
                if Instant::now() >= deadline {
                    return Err(self.timed_out(&job, invokers.len(), attempts));
                }
                tokio::task::yield_now().await;
                continue;
            }

            match tokio::time::timeout_at(deadline, capacity.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(DispatchError::Abandoned {
                        job: job.specification.clone(),
                    })
                }
                Err(_) => return Err(self.timed_out(&job, invokers.len(), attempts)),
            }
        }
    }

    fn timed_out(&self, job: &Job, invokers: usize, attempts: u32) -> DispatchError {
        tracing::warn!(
            job = %job.specification,
            invokers,
            attempts,
            timeout_ms = self.timeout.as_millis() as u64,
            "dispatch timed out"
        );
        DispatchError::Timeout {
            job: job.specification.clone(),
            timeout: self.timeout,
        }
    }

    /// Leave a registration with every invoker that has none of ours yet.
    /// True when some invoker reported capacity on the spot.
    fn arm(&self, invokers: &[(Arc<dyn JobInvoker>, Arc<AtomicBool>)]) -> bool {
        let mut free_now = false;
        for (invoker, armed) in invokers {
            if armed.swap(true, Ordering::AcqRel) {
                continue;
            }
            let (registration, signal) = Registration::new();
            if invoker.notify_when_available(registration) {
                armed.store(false, Ordering::Release);
                free_now = true;
                continue;
            }
            let armed = armed.clone();
            let capacity = self.capacity.clone();
            let invoker_id = invoker.invoker_id().to_string();
            tokio::spawn(async move {
                let wake = tokio::select! {
                    signalled = signal => signalled.is_ok(),
                    // Every waiting dispatch has finished; dropping `signal`
                    // makes the invoker skip this registration.
                    _ = capacity.closed() => {
                        tracing::debug!(invoker = %invoker_id, "registration withdrawn, no dispatch waiting");
                        true
                    }
                };
                armed.store(false, Ordering::Release);
                // A dispatch that saw `armed` set needs this wakeup to retry
                // or re-arm.
                if wake {
                    capacity.send_modify(|n| *n = n.wrapping_add(1));
                }
            });
        }
        free_now
    }

    fn snapshot(&self) -> Vec<(Arc<dyn JobInvoker>, Arc<AtomicBool>)> {
        self.invokers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| (r.invoker.clone(), r.armed.clone()))
            .collect()
    }
}

/// Routes each outcome of a dispatched chain to its waiting slot.
struct DispatchReceiver {
    pending: Mutex<HashMap<JobSpecification, oneshot::Sender<JobOutcome>>>,
}

impl DispatchReceiver {
    fn for_job(job: &Job) -> (Arc<Self>, Vec<(JobSpecification, oneshot::Receiver<JobOutcome>)>) {
        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for j in job.chain() {
            let (tx, rx) = oneshot::channel();
            senders.insert(j.specification.clone(), tx);
            receivers.push((j.specification.clone(), rx));
        }
        (
            Arc::new(Self {
                pending: Mutex::new(senders),
            }),
            receivers,
        )
    }

    fn deliver(&self, spec: &JobSpecification, outcome: JobOutcome) {
        let tx = self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(spec);
        match tx {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => tracing::warn!(job = %spec, "outcome for unknown or already reported job"),
        }
    }
}

impl JobInvocationReceiver for DispatchReceiver {
    fn job_completed(&self, result: JobResult) {
        let spec = result.specification.clone();
        self.deliver(&spec, Ok(result));
    }

    fn job_failed(&self, specification: &JobSpecification, failure: InvocationFailure) {
        self.deliver(
            specification,
            Err(DispatchError::InvocationFailed {
                job: specification.clone(),
                failure,
            }),
        );
    }
}
