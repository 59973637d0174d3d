//! Node output values and the ignore sentinel
//!
//! Every node call produces a [`NodeOutput`]: either an ordinary JSON value or
//! an [`IgnoreResult`]. The executor treats the value as opaque and only
//! special-cases the `Ignored` variant - an ignored result is still written
//! into its scope, but the scope is not a valid parent for downstream work, so
//! the branch it was produced in is pruned.
//!
//! `IgnoreResult` is a tagged variant, never detected by inspecting arbitrary
//! values, so user data can freely contain objects that merely *look* like the
//! sentinel.
//!
//! # Example
//!
//! ```rust
//! use dagflow_core::{IgnoreResult, NodeOutput};
//! use serde_json::json;
//!
//! let keep: NodeOutput = json!(42).into();
//! let skip: NodeOutput = IgnoreResult::new().with_reason("odd input").into();
//!
//! assert!(!keep.is_ignored());
//! assert!(skip.is_ignored());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel signalling that a branch of the result tree is pruned.
///
/// The node executed and its sentinel is retained in the scope (visible to
/// [`Scope::collect`](crate::Scope::collect) with the right filter), but no
/// successor work is scheduled under that scope. Never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnoreResult {
    /// Optional human-readable explanation of why the branch was pruned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Optional diagnostic payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IgnoreResult {
    /// Create a sentinel with no diagnostics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a reason string.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a diagnostic payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result of one node call: a live value or the ignore sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Ordinary value, bound into the call scope and visible to successors
    Value(Value),
    /// Pruned branch: bound into the call scope but never propagated
    Ignored(IgnoreResult),
}

impl NodeOutput {
    /// True for the `Ignored` variant.
    pub fn is_ignored(&self) -> bool {
        matches!(self, NodeOutput::Ignored(_))
    }

    /// The live value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            NodeOutput::Value(v) => Some(v),
            NodeOutput::Ignored(_) => None,
        }
    }

    /// Consume the output, yielding the live value if any.
    pub fn into_value(self) -> Option<Value> {
        match self {
            NodeOutput::Value(v) => Some(v),
            NodeOutput::Ignored(_) => None,
        }
    }

    /// The sentinel, if this output is ignored.
    pub fn as_ignored(&self) -> Option<&IgnoreResult> {
        match self {
            NodeOutput::Value(_) => None,
            NodeOutput::Ignored(ig) => Some(ig),
        }
    }

    /// JSON projection used by [`Scope::dump`](crate::Scope::dump). Ignored
    /// results stay distinguishable as a `{"$ignored": {...}}` object.
    pub(crate) fn dump_value(&self) -> Value {
        match self {
            NodeOutput::Value(v) => v.clone(),
            NodeOutput::Ignored(ig) => {
                let mut inner = serde_json::Map::new();
                if let Some(reason) = &ig.reason {
                    inner.insert("reason".to_string(), Value::String(reason.clone()));
                }
                if let Some(data) = &ig.data {
                    inner.insert("data".to_string(), data.clone());
                }
                let mut outer = serde_json::Map::new();
                outer.insert("$ignored".to_string(), Value::Object(inner));
                Value::Object(outer)
            }
        }
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        NodeOutput::Value(value)
    }
}

impl From<IgnoreResult> for NodeOutput {
    fn from(sentinel: IgnoreResult) -> Self {
        NodeOutput::Ignored(sentinel)
    }
}
