//! Wire shapes for job, result and identifier traffic.
//!
//! Descriptors travel in full exactly once per peer per cycle, inside an
//! `IdentifierRegistration`. Every job and result message after that refers
//! to them by `ValueHandle` only.
//!
//! `CalcEnvelope` is the JSON frame for all three message kinds.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::job::{InvocationOutcome, JobSpecification};
use crate::value::{TargetSpec, ValueDescriptor, ValueHandle, ValueRequest};

// ── Envelope ──────────────────────────────────────────────────────────────────

/// JSON envelope — discriminated by `msg_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalcEnvelope {
    /// Discriminator: "job", "job_result", "identifiers".
    pub msg_type: String,
    /// Type-specific content. Structure is defined by `msg_type`.
    pub payload: serde_json::Value,
}

/// Well-known `msg_type` strings.
pub mod msg_types {
    pub const JOB: &str = "job";
    pub const JOB_RESULT: &str = "job_result";
    pub const IDENTIFIERS: &str = "identifiers";
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Job(JobMessage),
    JobResult(ResultMessage),
    Identifiers(IdentifierRegistration),
}

impl WireMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            WireMessage::Job(_) => msg_types::JOB,
            WireMessage::JobResult(_) => msg_types::JOB_RESULT,
            WireMessage::Identifiers(_) => msg_types::IDENTIFIERS,
        }
    }

    /// Serialize into an envelope frame.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let payload = match self {
            WireMessage::Job(m) => serde_json::to_value(m),
            WireMessage::JobResult(m) => serde_json::to_value(m),
            WireMessage::Identifiers(m) => serde_json::to_value(m),
        }
        .map_err(WireError::Json)?;
        let envelope = CalcEnvelope {
            msg_type: self.msg_type().to_string(),
            payload,
        };
        let raw = serde_json::to_vec(&envelope).map_err(WireError::Json)?;
        Ok(Bytes::from(raw))
    }

    /// Parse an envelope frame.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let envelope: CalcEnvelope = serde_json::from_slice(raw).map_err(WireError::Json)?;
        match envelope.msg_type.as_str() {
            msg_types::JOB => Ok(WireMessage::Job(
                serde_json::from_value(envelope.payload).map_err(WireError::Json)?,
            )),
            msg_types::JOB_RESULT => Ok(WireMessage::JobResult(
                serde_json::from_value(envelope.payload).map_err(WireError::Json)?,
            )),
            msg_types::IDENTIFIERS => Ok(WireMessage::Identifiers(
                serde_json::from_value(envelope.payload).map_err(WireError::Json)?,
            )),
            other => Err(WireError::UnknownMessageType(other.to_string())),
        }
    }
}

// ── Job message ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub view_name: String,
    pub calc_config_name: String,
    pub cycle_id: u64,
    pub job_id: u64,
    pub function_repo_timestamp: u64,
    pub items: Vec<JobItemMessage>,
    pub cache_hint: CacheHintMessage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tail: Vec<JobMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItemMessage {
    pub function_id: String,
    pub target: TargetSpec,
    pub inputs: Vec<ValueHandle>,
    pub desired: Vec<ValueRequest>,
}

/// `private == true` means `values` are the private descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHintMessage {
    pub private: bool,
    pub values: Vec<ValueHandle>,
}

// ── Result message ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub specification: JobSpecification,
    pub duration_millis: u64,
    pub compute_node_id: String,
    pub items: Vec<ResultItemMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItemMessage {
    pub outcome: InvocationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub missing_inputs: Vec<ValueHandle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_outputs: Vec<ValueRequest>,
}

// ── Identifier registration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierEntry {
    pub handle: ValueHandle,
    pub descriptor: ValueDescriptor,
}

/// Descriptor → handle bindings the receiver has not seen yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierRegistration {
    pub entries: Vec<IdentifierEntry>,
}

impl IdentifierRegistration {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Identifier map protocol violations. Never tolerated silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("handle {0} was never registered")]
    UnknownHandle(ValueHandle),
    #[error("handle {handle} is already bound to {existing}")]
    Conflict {
        handle: ValueHandle,
        existing: ValueDescriptor,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid message JSON: {0}")]
    Json(serde_json::Error),
    #[error("unknown msg_type {0:?}")]
    UnknownMessageType(String),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}
