//! Store declarations and versioned, additive-only schema upgrades.
//!
//! A [`SchemaRegistry`] is declared once at process start. When a
//! [`LocalStore`](crate::LocalStore) opens, the persisted schema is compared
//! against the registry: new stores and indices are created in place, and
//! anything that would remove or retype existing data needs an explicit
//! [`Migration`] registered for a version in between.

mod migration;
mod social;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::key::{Key, KeyShape};

pub use migration::{Migration, MigrationContext};
pub use social::SOCIAL_SCHEMA_VERSION;

/// Secondary index over one or more record fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub shape: KeyShape,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSchema {
    pub name: String,
    pub key: KeyShape,
    pub indices: Vec<IndexSchema>,
    /// Fields every snapshot record must carry.
    pub required: Vec<String>,
    /// Field naming the owning user; snapshot records owned by someone else
    /// are rejected.
    pub owner: Option<String>,
    /// Written only by snapshot import, never by optimistic mutation.
    pub sync_only: bool,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>, key: KeyShape) -> Self {
        StoreSchema {
            name: name.into(),
            key,
            indices: Vec::new(),
            required: Vec::new(),
            owner: None,
            sync_only: false,
        }
    }

    pub fn index<I, S>(mut self, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices.push(IndexSchema {
            name: name.into(),
            shape: KeyShape::composite(fields),
        });
        self
    }

    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn owned_by(mut self, field: impl Into<String>) -> Self {
        self.owner = Some(field.into());
        self
    }

    pub fn sync_only(mut self) -> Self {
        self.sync_only = true;
        self
    }

    pub fn index_schema(&self, index: &str) -> Result<&IndexSchema, SchemaError> {
        self.indices
            .iter()
            .find(|i| i.name == index)
            .ok_or_else(|| SchemaError::UnknownIndex {
                store: self.name.clone(),
                index: index.to_string(),
            })
    }

    /// Validate a key (and the value it will be stored with) against this store.
    pub fn check_key(&self, key: &Key, value: Option<&serde_json::Value>) -> Result<(), SchemaError> {
        self.key
            .check(key, value)
            .map_err(|reason| SchemaError::MalformedKey {
                store: self.name.clone(),
                key: key.to_string(),
                reason,
            })
    }

    /// First required field that is absent or null in `value`.
    pub fn missing_field(&self, value: &serde_json::Value) -> Option<&str> {
        self.required
            .iter()
            .find(|field| value.get(field.as_str()).map_or(true, serde_json::Value::is_null))
            .map(String::as_str)
    }
}

/// The set of stores a [`LocalStore`](crate::LocalStore) manages, at one
/// schema version.
#[derive(Clone)]
pub struct SchemaRegistry {
    version: u32,
    stores: BTreeMap<String, StoreSchema>,
    migrations: Vec<Migration>,
}

impl SchemaRegistry {
    pub fn new(version: u32) -> Self {
        SchemaRegistry {
            version,
            stores: BTreeMap::new(),
            migrations: Vec::new(),
        }
    }

    /// Declare a store. Declaring the same name twice replaces the first
    /// declaration.
    pub fn store(mut self, schema: StoreSchema) -> Self {
        self.stores.insert(schema.name.clone(), schema);
        self
    }

    /// Register an explicit migration step run when upgrading past `version`.
    pub fn migration<F>(mut self, version: u32, description: impl Into<String>, step: F) -> Self
    where
        F: Fn(&mut MigrationContext<'_>) -> Result<(), SchemaError> + Send + Sync + 'static,
    {
        self.migrations.push(Migration {
            version,
            description: description.into(),
            step: Arc::new(step),
        });
        self.migrations.sort_by_key(|m| m.version);
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, name: &str) -> Result<&StoreSchema, SchemaError> {
        self.stores
            .get(name)
            .ok_or_else(|| SchemaError::UnknownStore(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreSchema> {
        self.stores.values()
    }

    /// Migrations that apply when upgrading from `from` to this registry's version.
    pub fn migrations_after(&self, from: u32) -> impl Iterator<Item = &Migration> {
        let to = self.version;
        self.migrations
            .iter()
            .filter(move |m| m.version > from && m.version <= to)
    }

    pub(crate) fn validate(&self) -> Result<(), SchemaError> {
        for name in self.stores.keys() {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
            if !valid {
                return Err(SchemaError::InvalidName(name.clone()));
            }
        }
        Ok(())
    }

    /// Refuse to open data written by a newer schema.
    pub(crate) fn check_version(&self, persisted: &PersistedSchema) -> Result<(), SchemaError> {
        if persisted.version > self.version {
            return Err(SchemaError::Downgrade {
                persisted: persisted.version,
                declared: self.version,
            });
        }
        Ok(())
    }

    /// Decide whether stores persisted at `persisted` can be opened with
    /// this registry once the pending migrations have run.
    ///
    /// Additive changes are always accepted. A removed or retyped store, or
    /// a removed index, is only accepted when a migration step dropped or
    /// rewrote that store (`migrated`).
    pub(crate) fn check_upgrade(
        &self,
        persisted: &PersistedSchema,
        migrated: &BTreeSet<String>,
    ) -> Result<(), SchemaError> {
        self.check_version(persisted)?;

        for (name, old) in &persisted.stores {
            if migrated.contains(name) {
                continue;
            }
            let reason = match self.stores.get(name) {
                None => Some("store was removed".to_string()),
                Some(current) if current.key != old.key => Some(format!(
                    "key changed from ({}) to ({})",
                    old.key.fields().join(", "),
                    current.key.fields().join(", ")
                )),
                Some(current) => old
                    .indices
                    .iter()
                    .find(|(index, shape)| {
                        current
                            .indices
                            .iter()
                            .all(|i| &i.name != *index || &i.shape != *shape)
                    })
                    .map(|(index, _)| format!("index `{}` was removed or retyped", index)),
            };
            if let Some(reason) = reason {
                return Err(SchemaError::Incompatible {
                    store: name.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn describe(&self) -> PersistedSchema {
        PersistedSchema {
            version: self.version,
            stores: self
                .stores
                .values()
                .map(|s| {
                    (
                        s.name.clone(),
                        PersistedStore {
                            key: s.key.clone(),
                            indices: s
                                .indices
                                .iter()
                                .map(|i| (i.name.clone(), i.shape.clone()))
                                .collect(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Schema description written next to the data (`schema.meta`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PersistedSchema {
    pub version: u32,
    pub stores: BTreeMap<String, PersistedStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PersistedStore {
    pub key: KeyShape,
    pub indices: BTreeMap<String, KeyShape>,
}
