use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SchemaError;
use crate::store::Table;

type MigrationStep = dyn Fn(&mut MigrationContext<'_>) -> Result<(), SchemaError> + Send + Sync;

/// An explicit, versioned upgrade step for changes that are not purely
/// additive (dropping a store, reshaping values before a key change).
///
/// Steps run in version order before stores are created and indices rebuilt.
#[derive(Clone)]
pub struct Migration {
    pub version: u32,
    pub description: String,
    pub(crate) step: Arc<MigrationStep>,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish()
    }
}

/// Mutable view of the persisted stores handed to a migration step.
pub struct MigrationContext<'a> {
    tables: &'a mut BTreeMap<String, Table>,
    touched: BTreeSet<String>,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(tables: &'a mut BTreeMap<String, Table>) -> Self {
        Self {
            tables,
            touched: BTreeSet::new(),
        }
    }

    /// Stores a step dropped or rewrote.
    pub(crate) fn into_touched(self) -> BTreeSet<String> {
        self.touched
    }

    pub fn stores(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Rewrite every record value of `store` in place. Keys are recomputed
    /// from the rewritten values when indices are rebuilt after migration.
    pub fn transform<F>(&mut self, store: &str, mut f: F) -> Result<usize, SchemaError>
    where
        F: FnMut(&mut Value),
    {
        let table = self
            .tables
            .get_mut(store)
            .ok_or_else(|| SchemaError::UnknownStore(store.to_string()))?;
        self.touched.insert(store.to_string());
        Ok(table.transform_values(&mut f))
    }

    /// Drop a store and all its records. Returns whether it existed.
    pub fn drop_store(&mut self, store: &str) -> bool {
        self.touched.insert(store.to_string());
        self.tables.remove(store).is_some()
    }
}
