//! Metadata values attached to vector records: a small JSON-like atom set.
//!
//! Covers the full JSON atom set a vector's metadata can hold: null, bool,
//! number, string, array, and nested map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single metadata value. Maps are keyed by `String` and kept in a
/// `BTreeMap` so serialized bytes are deterministic (matters for changelog
/// checksums, which hash over encoded records).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetadataValue::Null)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// A record's full metadata map, keyed by field name.
pub type Metadata = BTreeMap<String, MetadataValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), MetadataValue::from("agent-42"));
        map.insert("score".to_string(), MetadataValue::from(0.87_f64));
        map.insert("active".to_string(), MetadataValue::from(true));
        map.insert(
            "tags".to_string(),
            MetadataValue::Array(vec![MetadataValue::from("a"), MetadataValue::from("b")]),
        );

        let encoded = serde_json::to_vec(&map).unwrap();
        let decoded: Metadata = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(map, decoded);
    }

    #[test]
    fn accessors_narrow_by_variant() {
        let v = MetadataValue::from(42_i64);
        assert_eq!(v.as_i64(), Some(42));
        assert_eq!(v.as_str(), None);
    }
}
