//! Wire codec — converts jobs and results to their handle-compacted wire
//! form and back.
//!
//! Encoding assigns handles through the identifier map. Decoding requires
//! every handle to be known already; an unknown handle fails the whole
//! message. `IdentifierSync` tracks which handles a peer has been told
//! about so each descriptor crosses the wire once.

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use vantage_core::wire::{
    CacheHintMessage, IdentifierEntry, IdentifierError, IdentifierRegistration, JobItemMessage, JobMessage,
    ResultItemMessage, ResultMessage, WireError, WireMessage,
};
use vantage_core::{
    CacheSelectHint, ExceptionInfo, Job, JobItem, JobResult, JobSpecification, ResultItem, ValueHandle,
};

use crate::identifier::IdentifierMap;

// ── Jobs ──────────────────────────────────────────────────────────────────────

pub fn encode_job(job: &Job, map: &dyn IdentifierMap) -> JobMessage {
    let spec = &job.specification;
    JobMessage {
        view_name: spec.view_name.clone(),
        calc_config_name: spec.calc_config_name.clone(),
        cycle_id: spec.cycle_id,
        job_id: spec.job_id,
        function_repo_timestamp: job.function_repo_timestamp,
        items: job
            .items
            .iter()
            .map(|item| JobItemMessage {
                function_id: item.function_id.clone(),
                target: item.target.clone(),
                inputs: map.get_or_assign_all(&item.inputs),
                desired: item.desired.clone(),
            })
            .collect(),
        cache_hint: CacheHintMessage {
            private: job.cache_hint.lists_private(),
            values: job.cache_hint.listed().iter().map(|d| map.get_or_assign(d)).collect(),
        },
        tail: job.tail.iter().map(|t| encode_job(t, map)).collect(),
    }
}

pub fn decode_job(msg: &JobMessage, map: &dyn IdentifierMap) -> Result<Job, IdentifierError> {
    let items = msg
        .items
        .iter()
        .map(|item| {
            Ok(JobItem {
                function_id: item.function_id.clone(),
                target: item.target.clone(),
                inputs: map.resolve_all(&item.inputs)?,
                desired: item.desired.clone(),
            })
        })
        .collect::<Result<Vec<_>, IdentifierError>>()?;

    let listed = map.resolve_all(&msg.cache_hint.values)?.into_iter().collect();
    let cache_hint = if msg.cache_hint.private {
        CacheSelectHint::PrivateValues(listed)
    } else {
        CacheSelectHint::SharedValues(listed)
    };

    Ok(Job {
        specification: JobSpecification::new(
            msg.view_name.clone(),
            msg.calc_config_name.clone(),
            msg.cycle_id,
            msg.job_id,
        ),
        function_repo_timestamp: msg.function_repo_timestamp,
        items,
        cache_hint,
        tail: msg
            .tail
            .iter()
            .map(|t| decode_job(t, map))
            .collect::<Result<_, _>>()?,
    })
}

// ── Results ───────────────────────────────────────────────────────────────────

pub fn encode_result(result: &JobResult, map: &dyn IdentifierMap) -> ResultMessage {
    ResultMessage {
        specification: result.specification.clone(),
        duration_millis: result.duration.as_millis() as u64,
        compute_node_id: result.node_id.clone(),
        items: result
            .items
            .iter()
            .map(|item| ResultItemMessage {
                outcome: item.outcome,
                exception_class: item.exception.as_ref().map(|e| e.kind.clone()),
                exception_message: item.exception.as_ref().map(|e| e.message.clone()),
                stack_trace: item
                    .exception
                    .as_ref()
                    .map(|e| e.stack_trace.clone())
                    .filter(|t| !t.is_empty()),
                missing_inputs: map.get_or_assign_all(&item.missing_inputs),
                missing_outputs: item.missing_outputs.clone(),
            })
            .collect(),
    }
}

pub fn decode_result(msg: &ResultMessage, map: &dyn IdentifierMap) -> Result<JobResult, IdentifierError> {
    let items = msg
        .items
        .iter()
        .enumerate()
        .map(|(item_index, item)| {
            let exception = item.exception_class.as_ref().map(|kind| ExceptionInfo {
                kind: kind.clone(),
                message: item.exception_message.clone().unwrap_or_default(),
                stack_trace: item.stack_trace.clone().unwrap_or_default(),
            });
            Ok(ResultItem {
                item_index,
                outcome: item.outcome,
                exception,
                missing_inputs: map.resolve_all(&item.missing_inputs)?,
                missing_outputs: item.missing_outputs.clone(),
            })
        })
        .collect::<Result<Vec<_>, IdentifierError>>()?;

    Ok(JobResult {
        specification: msg.specification.clone(),
        duration: Duration::from_millis(msg.duration_millis),
        items,
        node_id: msg.compute_node_id.clone(),
    })
}

// ── Identifier sync ───────────────────────────────────────────────────────────

/// Handles referenced by a message, in first-seen order.
pub fn referenced_handles(message: &WireMessage) -> Vec<ValueHandle> {
    fn job(msg: &JobMessage, out: &mut Vec<ValueHandle>) {
        for item in &msg.items {
            out.extend(&item.inputs);
        }
        out.extend(&msg.cache_hint.values);
        for t in &msg.tail {
            job(t, out);
        }
    }

    let mut out = Vec::new();
    match message {
        WireMessage::Job(msg) => job(msg, &mut out),
        WireMessage::JobResult(msg) => {
            for item in &msg.items {
                out.extend(&item.missing_inputs);
            }
        }
        WireMessage::Identifiers(reg) => out.extend(reg.entries.iter().map(|e| e.handle)),
    }
    out
}

/// Tracks the handles one peer has been sent during a cycle.
#[derive(Debug, Default)]
pub struct IdentifierSync {
    sent: HashSet<ValueHandle>,
}

impl IdentifierSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration for the handles among `handles` the peer has not seen.
    pub fn registration(
        &mut self,
        handles: impl IntoIterator<Item = ValueHandle>,
        map: &dyn IdentifierMap,
    ) -> Result<IdentifierRegistration, IdentifierError> {
        let mut entries = Vec::new();
        for handle in handles {
            if self.sent.contains(&handle) {
                continue;
            }
            let descriptor = map.resolve(handle)?;
            self.sent.insert(handle);
            entries.push(IdentifierEntry { handle, descriptor });
        }
        Ok(IdentifierRegistration { entries })
    }

    /// Encode `message`, preceded by an identifiers frame when it
    /// references handles the peer has not seen.
    pub fn frames(&mut self, message: &WireMessage, map: &dyn IdentifierMap) -> Result<Vec<Bytes>, WireError> {
        let mut frames = Vec::with_capacity(2);
        if !matches!(message, WireMessage::Identifiers(_)) {
            let registration = self.registration(referenced_handles(message), map)?;
            if !registration.is_empty() {
                frames.push(WireMessage::Identifiers(registration).encode()?);
            }
        }
        frames.push(message.encode()?);
        Ok(frames)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    /// Forget everything sent; the next cycle starts from scratch.
    pub fn reset(&mut self) {
        self.sent.clear();
    }
}

/// Mirror a peer's registration into `map`. Returns the entries applied.
pub fn apply_registration(
    registration: &IdentifierRegistration,
    map: &dyn IdentifierMap,
) -> Result<usize, IdentifierError> {
    for entry in &registration.entries {
        map.register(entry.handle, entry.descriptor.clone())?;
    }
    Ok(registration.entries.len())
}
