use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A single metadata value. The set of variants is closed on purpose; any
/// structured payload belongs in a child [`Meta`] node instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // bit comparison keeps Meta usable as a map key
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::List(v) => v.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// A named tree of values and child nodes.
///
/// `Meta` plays two roles: task configuration (read with the `*_or` getters,
/// merged with [`Meta::over`]) and cache identity (compared structurally,
/// hashed canonically). The ordered maps make equality and hashing
/// independent of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meta {
    name: String,
    values: BTreeMap<String, Value>,
    nodes: BTreeMap<String, Meta>,
}

impl Meta {
    pub fn new(name: impl Into<String>) -> Self {
        Meta {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The anonymous empty meta.
    pub fn empty() -> Self {
        Meta::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when there are no values and no child nodes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.nodes.is_empty()
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn put_node(mut self, key: impl Into<String>, node: Meta) -> Self {
        self.nodes.insert(key.into(), node);
        self
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn node(&self, key: &str) -> Option<&Meta> {
        self.nodes.get(key)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(Value::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        match self.values.get(key) {
            Some(Value::Float(v)) => *v,
            Some(Value::Int(v)) => *v as f64,
            _ => default,
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.values.get(key) {
            Some(Value::String(v)) => v,
            _ => default,
        }
    }

    /// Laminate this meta over a base layer.
    ///
    /// Values present here win; child nodes with the same key are merged
    /// recursively. The result keeps this meta's name unless it is empty.
    pub fn over(&self, base: &Meta) -> Meta {
        let mut result = base.clone();

        if !self.name.is_empty() {
            result.name = self.name.clone();
        }

        for (key, value) in &self.values {
            result.values.insert(key.clone(), value.clone());
        }

        for (key, node) in &self.nodes {
            let merged = match base.nodes.get(key) {
                Some(under) => node.over(under),
                None => node.clone(),
            };
            result.nodes.insert(key.clone(), merged);
        }

        result
    }

    /// A stable 64-bit digest of the full structure, suitable for file
    /// naming across processes. Equal metas always produce equal digests;
    /// the converse is checked separately wherever it matters.
    pub fn identity_hash(&self) -> u64 {
        let mut hasher = Blake3Hasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Export as a JSON string, mostly for debugging and logs.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A `std::hash::Hasher` over BLAKE3, so structural hashing produces the
/// same digest in every process regardless of hasher seeding.
#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl Hasher for Blake3Hasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = Meta::new("id").put("x", 1).put("y", 2.5);
        let b = Meta::new("id").put("y", 2.5).put("x", 1);
        assert_eq!(a, b);
        assert_eq!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn inequality_changes_hash() {
        let a = Meta::new("id").put("x", 1);
        let b = Meta::new("id").put("x", 2);
        assert_ne!(a, b);
        assert_ne!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn lamination_overlay_wins() {
        let base = Meta::new("base")
            .put("a", 1)
            .put("b", 2)
            .put_node("sub", Meta::empty().put("x", 1).put("y", 2));
        let overlay = Meta::new("overlay")
            .put("b", 20)
            .put_node("sub", Meta::empty().put("y", 20));

        let merged = overlay.over(&base);
        assert_eq!(merged.i64_or("a", 0), 1);
        assert_eq!(merged.i64_or("b", 0), 20);

        let sub = merged.node("sub").unwrap();
        assert_eq!(sub.i64_or("x", 0), 1);
        assert_eq!(sub.i64_or("y", 0), 20);
        assert_eq!(merged.name(), "overlay");
    }

    #[test]
    fn getters_fall_back_on_defaults() {
        let meta = Meta::empty().put("flag", true).put("count", 3);
        assert!(meta.bool_or("flag", false));
        assert!(meta.bool_or("missing", true));
        assert_eq!(meta.i64_or("count", 0), 3);
        assert_eq!(meta.str_or("missing", "fallback"), "fallback");
        assert_eq!(meta.f64_or("count", 0.0), 3.0);
    }

    #[test]
    fn empty_checks() {
        assert!(Meta::empty().is_empty());
        assert!(Meta::new("named").is_empty());
        assert!(!Meta::empty().put("k", 1).is_empty());
    }

    #[test]
    fn json_export() {
        let meta = Meta::new("id").put("x", 1);
        let json = meta.to_json().unwrap();
        assert!(json.contains("\"x\""));
    }
}
