//! Typed keyword records attached to tables and columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{array::ArrayValue, value::Value};

/// A single keyword value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeywordValue {
    /// A scalar value.
    Scalar(Value),
    /// A string.
    String(String),
    /// An array.
    Array(ArrayValue),
    /// A nested record.
    Record(Keywords),
}

impl From<Value> for KeywordValue {
    fn from(value: Value) -> Self {
        KeywordValue::Scalar(value)
    }
}

impl From<&str> for KeywordValue {
    fn from(value: &str) -> Self {
        KeywordValue::String(value.to_string())
    }
}

impl From<String> for KeywordValue {
    fn from(value: String) -> Self {
        KeywordValue::String(value)
    }
}

impl From<ArrayValue> for KeywordValue {
    fn from(value: ArrayValue) -> Self {
        KeywordValue::Array(value)
    }
}

impl From<Keywords> for KeywordValue {
    fn from(value: Keywords) -> Self {
        KeywordValue::Record(value)
    }
}

/// An ordered record of named keyword values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Keywords {
    fields: BTreeMap<String, KeywordValue>,
}

impl Keywords {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<KeywordValue>) -> Option<KeywordValue> {
        self.fields.insert(name.into(), value.into())
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KeywordValue> {
        self.fields.get(name)
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<KeywordValue> {
        self.fields.remove(name)
    }

    /// Returns `true` if the field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeywordValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}
