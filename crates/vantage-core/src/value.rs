//! Value identity types — targets, properties, descriptors and requests.
//!
//! A `ValueDescriptor` names one fully resolved computed value and is the
//! unit that is cached, requested and produced. A `ValueRequest` is the
//! unresolved form: a name on a target plus property constraints that any
//! number of descriptors may satisfy.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Targets ───────────────────────────────────────────────────────────────────

/// Kind of entity a computation is performed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Portfolio,
    PortfolioNode,
    Position,
    Trade,
    Security,
    /// Anything addressed purely by identifier (curves, market data, ...).
    Primitive,
}

/// `(type, id)` pair identifying a computation target.
///
/// The core never dereferences a target. It is handed to functions as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub id: String,
}

impl TargetSpec {
    pub fn new(target_type: TargetType, id: impl Into<String>) -> Self {
        Self {
            target_type,
            id: id.into(),
        }
    }

    pub fn primitive(id: impl Into<String>) -> Self {
        Self::new(TargetType::Primitive, id)
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}~{}", self.target_type, self.id)
    }
}

// ── Properties ────────────────────────────────────────────────────────────────

/// Property name → set of values.
///
/// Used both for the resolved properties of a descriptor and for the
/// constraints of a request. As a constraint, an empty value set means
/// "any value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueProperties(BTreeMap<String, BTreeSet<String>>);

impl ValueProperties {
    pub fn none() -> Self {
        Self::default()
    }

    /// Add `value` to property `name`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.entry(name.into()).or_default().insert(value.into());
        self
    }

    /// Constrain `name` to be present with any value.
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.0.entry(name.into()).or_default();
        self
    }

    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `resolved` meets every constraint in `self`.
    pub fn is_satisfied_by(&self, resolved: &ValueProperties) -> bool {
        self.0.iter().all(|(name, wanted)| match resolved.0.get(name) {
            None => false,
            Some(_) if wanted.is_empty() => true,
            Some(have) => !wanted.is_disjoint(have),
        })
    }
}

// ── Descriptors and requests ──────────────────────────────────────────────────

/// Fully resolved identifier of one computed value.
///
/// Equality, hashing and ordering are structural over all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueDescriptor {
    pub value_name: String,
    pub target: TargetSpec,
    pub function_id: String,
    #[serde(default, skip_serializing_if = "ValueProperties::is_empty")]
    pub properties: ValueProperties,
}

impl ValueDescriptor {
    pub fn new(
        value_name: impl Into<String>,
        target: TargetSpec,
        function_id: impl Into<String>,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            function_id: function_id.into(),
            properties,
        }
    }

    /// True when this descriptor is an acceptable answer to `request`.
    pub fn satisfies(&self, request: &ValueRequest) -> bool {
        self.value_name == request.value_name
            && self.target == request.target
            && request.constraints.is_satisfied_by(&self.properties)
    }
}

impl fmt::Display for ValueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] by {}", self.value_name, self.target, self.function_id)
    }
}

/// Request for a value whose producing function is not yet bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequest {
    pub value_name: String,
    pub target: TargetSpec,
    #[serde(default, skip_serializing_if = "ValueProperties::is_empty")]
    pub constraints: ValueProperties,
}

impl ValueRequest {
    pub fn new(value_name: impl Into<String>, target: TargetSpec, constraints: ValueProperties) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints,
        }
    }

    /// Resolve this request into a descriptor produced by `function_id`.
    pub fn resolve(&self, function_id: impl Into<String>, properties: ValueProperties) -> ValueDescriptor {
        ValueDescriptor::new(self.value_name.clone(), self.target.clone(), function_id, properties)
    }
}

impl fmt::Display for ValueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.value_name, self.target)
    }
}

// ── Handles ───────────────────────────────────────────────────────────────────

/// Compact 4-byte stand-in for a `ValueDescriptor` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueHandle(pub u32);

impl fmt::Display for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

/// A computed value. Functions may produce any variant; the core only
/// stores and forwards them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Value {
    Double(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
    DoubleVector(Vec<f64>),
    /// Labelled doubles, e.g. sensitivities keyed by tenor.
    Labelled(BTreeMap<String, f64>),
    /// Opaque structured payload.
    Json(serde_json::Value),
}

impl Value {
    /// Scalar view of numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// A value together with the descriptor it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValue {
    pub descriptor: ValueDescriptor,
    pub value: Value,
}

impl ComputedValue {
    pub fn new(descriptor: ValueDescriptor, value: Value) -> Self {
        Self { descriptor, value }
    }
}
