//! Object store and index creation parameters

use serde::{Deserialize, Serialize};

/// Configuration of an object store.
///
/// With a `key_path`, keys are read from the record (inline keys); without one
/// the caller supplies them (out-of-line keys). `auto_increment` lets the
/// engine generate integer keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default)]
    pub auto_increment: bool,
}

impl StoreParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_path(mut self, key_path: impl Into<String>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// Configuration of a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexParameters {
    /// Reject records whose index key is already used by another record
    #[serde(default)]
    pub unique: bool,
    /// Index every element of an array-valued key path separately
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}
