//! Typed key-value attributes carried by functors.
//!
//! Operation parameters that are not tensors — reduction offsets, permutation
//! orders, extension factors, matmul group counts — ride in an ordered
//! attribute map so serialization and structural comparison see a stable
//! form.

use std::collections::BTreeMap;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    IntList(Vec<i64>),
    Float(f64),
    Str(String),
}

/// Ordered attribute map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs {
    entries: BTreeMap<String, AttrValue>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        self.entries.insert(key.into(), value);
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.entries.remove(key)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn int_list(&self, key: &str) -> Option<&[i64]> {
        match self.entries.get(key) {
            Some(AttrValue::IntList(v)) => Some(v),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
