//! Shared types for lamina
//!
//! This crate provides the identity types used across the lamina crates:
//! item keys for keyed collections and channel names for sink bundles.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use serde_json::Value;

/// Name of the field read by [`Key::of_item`]
pub const DEFAULT_KEY_FIELD: &str = "key";

/// Stable identity of one collection item across updates
///
/// JSON scalars map onto their own variants so that `1` and `"1"` stay
/// distinct. Anything else (floats, arrays, objects) is keyed by its
/// canonical JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Missing or `null` key
    Null,
    /// Boolean key
    Bool(bool),
    /// Integer key
    Int(i64),
    /// String key
    Str(String),
    /// Any other JSON value, as canonical text
    Json(String),
}

impl Key {
    /// Build a key from an arbitrary JSON value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Key::Null,
            Value::Bool(b) => Key::Bool(*b),
            Value::String(s) => Key::Str(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Key::Int(i),
                None => Key::Json(n.to_string()),
            },
            other => Key::Json(other.to_string()),
        }
    }

    /// Default key extraction: the `key` field of an object item
    pub fn of_item(item: &Value) -> Self {
        item.get(DEFAULT_KEY_FIELD)
            .map(Key::from_value)
            .unwrap_or(Key::Null)
    }

    /// Check if this is the null key
    pub fn is_null(&self) -> bool {
        matches!(self, Key::Null)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => write!(f, "null"),
            Key::Bool(b) => write!(f, "{b}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s:?}"),
            Key::Json(s) => write!(f, "{s}"),
        }
    }
}

/// Name of an output channel in a sink bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelName(pub String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        ChannelName(name.to_string())
    }
}

impl From<String> for ChannelName {
    fn from(name: String) -> Self {
        ChannelName(name)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
