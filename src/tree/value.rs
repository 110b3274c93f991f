//! Typed leaf values, updates and notifications.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed scalar or blob carried by an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedValue {
    String(String),
    Uint(u64),
    Int(i64),
    Bool(bool),
    /// Serialized sub-tree, used for non-leaf nodes and blob updates.
    Json(Value),
}

impl TypedValue {
    /// Convert a resolved tree node into a typed value.
    ///
    /// Scalars map to their typed variants; objects and arrays become JSON
    /// blobs. Returns None for a node kind with no typed representation.
    pub fn from_node(node: &Value) -> Option<TypedValue> {
        match node {
            Value::String(s) => Some(TypedValue::String(s.clone())),
            Value::Bool(b) => Some(TypedValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(TypedValue::Uint(u))
                } else {
                    n.as_i64().map(TypedValue::Int)
                }
            }
            Value::Object(_) | Value::Array(_) => Some(TypedValue::Json(node.clone())),
            Value::Null => None,
        }
    }

    /// The JSON form written into the tree by Set.
    pub fn to_node(&self) -> Value {
        match self {
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Uint(u) => Value::from(*u),
            TypedValue::Int(i) => Value::from(*i),
            TypedValue::Bool(b) => Value::Bool(*b),
            TypedValue::Json(v) => v.clone(),
        }
    }
}

/// A single (path, value) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub path: String,
    pub value: TypedValue,
}

/// The unit returned by Get and streamed by Subscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub prefix: String,
    pub updates: Vec<Update>,
}

impl Notification {
    pub fn new(prefix: String, updates: Vec<Update>) -> Self {
        Self {
            timestamp: now_nanos(),
            prefix,
            updates,
        }
    }
}

/// Current wall-clock time in nanoseconds since the epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
