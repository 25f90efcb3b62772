//! Pull sync: bulk replacement of local stores from a backend export.

mod importer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use importer::{ImportReport, RejectedRecord, SnapshotImporter, StoreFailure};

/// Point-in-time export of one or more stores: store name to its records,
/// as plain JSON objects.
///
/// Serialized as a bare JSON object:
///
/// ```json
/// { "channel_follows": [{ "user_id": "u1", "channel_username": "alice" }] }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    stores: BTreeMap<String, Vec<Value>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Add (or replace) the records of one store.
    pub fn with_store(mut self, store: impl Into<String>, records: Vec<Value>) -> Self {
        self.insert(store, records);
        self
    }

    pub fn insert(&mut self, store: impl Into<String>, records: Vec<Value>) {
        self.stores.insert(store.into(), records);
    }

    pub fn get(&self, store: &str) -> Option<&[Value]> {
        self.stores.get(store).map(Vec::as_slice)
    }

    pub fn stores(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.stores.iter().map(|(name, records)| (name.as_str(), records.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
