//! The dynamic value tree used as both input payload and output graph.
//!
//! Dictionaries preserve insertion order, which response shaping and
//! hydration both rely on: `IndexMap` gives that for free instead of
//! re-deriving ordering from a side vector.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Reserved dictionary keys carrying metadata rather than scheme fields.
pub mod meta_keys {
    pub const OID: &str = "__oid";
    pub const DELTA: &str = "__delta";
    pub const VIEWS: &str = "__views";
    pub const TS_RANK: &str = "__ts_rank";
    pub const HEADLINES: &str = "__headlines";
}

pub type Dict = IndexMap<String, Value>;

/// A dynamically typed tree: `Null | Bool | Int | Double | String | Bytes
/// | Array<Value> | Dictionary<String, Value>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Dict(Dict),
}

impl Value {
    pub fn dict() -> Self {
        Value::Dict(Dict::new())
    }

    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Coerce a bare scalar or array into a `Vec<Value>`, the way Array
    /// property fields accept a scalar, an array, or a dict keyed by
    /// field name (the caller unwraps the dict first).
    pub fn coerce_to_array(self) -> Vec<Value> {
        match self {
            Value::Array(a) => a,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }

    /// Returns the oid this value represents: either a bare integer
    /// placeholder or a dictionary's `__oid` entry.
    pub fn placeholder_oid(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Dict(d) => d.get(meta_keys::OID).and_then(Value::as_int),
            _ => None,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Dict(d) = self {
            d.insert(key.into(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_oid_reads_bare_int_or_dict() {
        assert_eq!(Value::Int(42).placeholder_oid(), Some(42));
        let mut d = Value::dict();
        d.set(meta_keys::OID, Value::Int(7));
        assert_eq!(d.placeholder_oid(), Some(7));
        assert_eq!(Value::Null.placeholder_oid(), None);
    }

    #[test]
    fn coerce_to_array_wraps_scalars() {
        assert_eq!(Value::Int(1).coerce_to_array().len(), 1);
        assert_eq!(Value::Null.coerce_to_array().len(), 0);
        assert_eq!(Value::Array(vec![Value::Int(1), Value::Int(2)]).coerce_to_array().len(), 2);
    }
}
