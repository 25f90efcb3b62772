use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchemaError, StorageError};
use crate::key::Key;
use crate::schema::StoreSchema;

/// One entity record as held by a store.
///
/// `version` only ever grows. `pending` marks a local optimistic write the
/// backend has not confirmed yet.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub key: Key,
    pub value: Value,
    pub version: u64,
    pub pending: bool,
}

impl StoredRecord {
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// On-disk form. Values travel as JSON text since the binary encoding has no
/// self-describing map type.
#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    key: Key,
    value: String,
    version: u64,
    pending: bool,
}

/// In-memory table for one store: records by primary key plus the
/// secondary indices declared in its schema.
#[derive(Clone, Debug)]
pub(crate) struct Table {
    schema: StoreSchema,
    records: BTreeMap<Key, StoredRecord>,
    indices: BTreeMap<String, BTreeMap<Key, BTreeSet<Key>>>,
}

impl Table {
    pub fn new(schema: StoreSchema) -> Self {
        let indices = schema
            .indices
            .iter()
            .map(|i| (i.name.clone(), BTreeMap::new()))
            .collect();
        Table {
            schema,
            records: BTreeMap::new(),
            indices,
        }
    }

    pub fn from_records(schema: StoreSchema, records: impl IntoIterator<Item = StoredRecord>) -> Self {
        let mut table = Table::new(schema);
        for record in records {
            table.insert(record);
        }
        table
    }

    pub fn decode(schema: StoreSchema, blob: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let persisted: Vec<PersistedRecord> =
            bitcode::deserialize(bytes).map_err(|e| StorageError::Corrupt {
                name: blob.to_string(),
                reason: e.to_string(),
            })?;
        let mut records = Vec::with_capacity(persisted.len());
        for record in persisted {
            let value = serde_json::from_str(&record.value).map_err(|e| StorageError::Corrupt {
                name: blob.to_string(),
                reason: format!("record {}: {}", record.key, e),
            })?;
            records.push(StoredRecord {
                key: record.key,
                value,
                version: record.version,
                pending: record.pending,
            });
        }
        Ok(Table::from_records(schema, records))
    }

    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let mut persisted = Vec::with_capacity(self.records.len());
        for record in self.records.values() {
            persisted.push(PersistedRecord {
                key: record.key.clone(),
                value: serde_json::to_string(&record.value)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?,
                version: record.version,
                pending: record.pending,
            });
        }
        bitcode::serialize(&persisted).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    pub fn get(&self, key: &Key) -> Option<&StoredRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &StoredRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Insert or replace a record, keeping indices in step.
    pub fn insert(&mut self, record: StoredRecord) -> Option<StoredRecord> {
        let previous = self.remove(&record.key);
        for index in &self.schema.indices {
            if let Some(value) = index.shape.try_extract(&record.value) {
                if let Some(entries) = self.indices.get_mut(&index.name) {
                    entries.entry(value).or_default().insert(record.key.clone());
                }
            }
        }
        self.records.insert(record.key.clone(), record);
        previous
    }

    pub fn remove(&mut self, key: &Key) -> Option<StoredRecord> {
        let removed = self.records.remove(key)?;
        for index in &self.schema.indices {
            let Some(value) = index.shape.try_extract(&removed.value) else {
                continue;
            };
            if let Some(entries) = self.indices.get_mut(&index.name) {
                if let Some(keys) = entries.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        entries.remove(&value);
                    }
                }
            }
        }
        Some(removed)
    }

    pub fn clear(&mut self) -> Vec<StoredRecord> {
        for entries in self.indices.values_mut() {
            entries.clear();
        }
        std::mem::take(&mut self.records).into_values().collect()
    }

    pub fn query(&self, index: &str, value: &Key) -> Result<Vec<StoredRecord>, SchemaError> {
        self.schema.index_schema(index)?;
        let Some(keys) = self.indices.get(index).and_then(|entries| entries.get(value)) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| self.records.get(key))
            .cloned()
            .collect())
    }

    pub fn transform_values(&mut self, f: &mut dyn FnMut(&mut Value)) -> usize {
        for record in self.records.values_mut() {
            f(&mut record.value);
        }
        // values may have changed indexed fields
        let records: Vec<StoredRecord> = std::mem::take(&mut self.records).into_values().collect();
        let count = records.len();
        *self = Table::from_records(self.schema.clone(), records);
        count
    }

    /// Re-create the table under a (possibly changed) schema. Keys are
    /// re-derived from values when the key shape changed; records whose key
    /// cannot be derived are dropped. Returns the table and the drop count.
    pub fn rebuild(self, schema: StoreSchema) -> (Table, usize) {
        let rekey = schema.key != self.schema.key;
        let mut dropped = 0;
        let mut records = Vec::with_capacity(self.records.len());
        for mut record in self.records.into_values() {
            if rekey {
                match schema.key.extract(&record.value) {
                    Ok(key) => record.key = key,
                    Err(_) => {
                        dropped += 1;
                        continue;
                    }
                }
            }
            records.push(record);
        }
        (Table::from_records(schema, records), dropped)
    }
}
