use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::StorageRetry;
use crate::error::{SchemaError, StorageError, SyncError};
use crate::key::Key;
use crate::notify::{ChangeCause, ChangeEvent, Subscribers};
use crate::schema::{
    IndexSchema, MigrationContext, PersistedSchema, PersistedStore, SchemaRegistry, StoreSchema,
};

use super::{
    retrying, store_blob, EntityStore, Record, StorageBackend, StoredRecord, Table, SCHEMA_BLOB,
};

/// How a controller-driven write should be recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteKind {
    /// Local write ahead of the backend; marks the record pending.
    Optimistic,
    /// Value acknowledged by the backend.
    Confirmed,
    /// Revert to the value held before the mutation.
    RolledBack,
}

impl WriteKind {
    fn cause(self) -> ChangeCause {
        match self {
            WriteKind::Optimistic => ChangeCause::Optimistic,
            WriteKind::Confirmed => ChangeCause::Confirmed,
            WriteKind::RolledBack => ChangeCause::RolledBack,
        }
    }
}

/// The local mirror: every declared store, held in memory and written through
/// to a [`StorageBackend`].
///
/// Clone-friendly (clones share the same state). Every operation opens the
/// store lazily; concurrent first callers share one initialization, which
/// upgrades the persisted schema in place before any store operation runs.
///
/// Each mutating operation is atomic on its own: the changed table is
/// encoded and persisted before it replaces the in-memory one, so a failed
/// write leaves both memory and disk as they were.
#[derive(Clone)]
pub struct LocalStore {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn StorageBackend>,
    registry: SchemaRegistry,
    retry: StorageRetry,
    tables: RwLock<BTreeMap<String, Table>>,
    write_locks: HashMap<String, Mutex<()>>,
    init: OnceCell<()>,
    closed: AtomicBool,
    subscribers: Subscribers,
}

impl LocalStore {
    pub fn new<B: StorageBackend + 'static>(backend: B, registry: SchemaRegistry) -> Self {
        Self::with_storage_retry(Arc::new(backend), registry, StorageRetry::default())
    }

    pub fn with_storage_retry(
        backend: Arc<dyn StorageBackend>,
        registry: SchemaRegistry,
        retry: StorageRetry,
    ) -> Self {
        let write_locks = registry
            .stores()
            .map(|s| (s.name.clone(), Mutex::new(())))
            .collect();
        LocalStore {
            shared: Arc::new(Shared {
                backend,
                registry,
                retry,
                tables: RwLock::new(BTreeMap::new()),
                write_locks,
                init: OnceCell::new(),
                closed: AtomicBool::new(false),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Open the store, upgrading persisted data to the declared schema.
    /// Idempotent; concurrent callers wait on the same initialization.
    pub async fn open(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        self.shared.init.get_or_try_init(|| self.initialize()).await?;
        Ok(())
    }

    /// Close the store. Waits for in-flight writes; every later operation
    /// fails with [`SyncError::Closed`].
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for lock in self.shared.write_locks.values() {
            let _guard = lock.lock().await;
        }
        if let Ok(mut tables) = self.shared.tables.write() {
            tables.clear();
        }
        info!("local store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    pub fn schema(&self, store: &str) -> Result<&StoreSchema, SchemaError> {
        self.shared.registry.get(store)
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.shared.subscribers
    }

    pub(crate) fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.shared.backend)
    }

    pub(crate) fn storage_retry(&self) -> &StorageRetry {
        &self.shared.retry
    }

    /// Typed access to the store declared for `R`.
    pub fn entities<R: Record>(&self) -> EntityStore<'_, R> {
        EntityStore::new(self)
    }

    pub async fn get(&self, store: &str, key: &Key) -> Result<Option<StoredRecord>, SyncError> {
        self.open().await?;
        self.with_table(store, |table| {
            table.schema().check_key(key, None)?;
            Ok(table.get(key).cloned())
        })
    }

    pub async fn get_all(&self, store: &str) -> Result<Vec<StoredRecord>, SyncError> {
        self.open().await?;
        self.with_table(store, |table| Ok(table.records().cloned().collect()))
    }

    /// Records whose `index` fields equal `value`, in primary key order.
    pub async fn query_by_index(
        &self,
        store: &str,
        index: &str,
        value: &Key,
    ) -> Result<Vec<StoredRecord>, SyncError> {
        self.open().await?;
        self.with_table(store, |table| {
            let shape = &table.schema().index_schema(index)?.shape;
            if value.arity() != shape.arity() {
                return Err(SchemaError::MalformedKey {
                    store: store.to_string(),
                    key: value.to_string(),
                    reason: format!("index `{}` has {} field(s)", index, shape.arity()),
                }
                .into());
            }
            Ok(table.query(index, value)?)
        })
    }

    /// Insert or replace a confirmed record.
    pub async fn put(&self, store: &str, key: Key, value: Value) -> Result<StoredRecord, SyncError> {
        self.commit(store, |table| {
            check_value(table.schema(), &key, &value)?;
            let version = table.get(&key).map_or(1, |r| r.version + 1);
            let record = StoredRecord {
                key,
                value,
                version,
                pending: false,
            };
            table.insert(record.clone());
            let event = changed(store, &record, ChangeCause::Put);
            Ok((record, vec![event]))
        })
        .await
    }

    /// Remove a record. Returns whether it existed.
    pub async fn delete(&self, store: &str, key: &Key) -> Result<bool, SyncError> {
        self.commit(store, |table| {
            table.schema().check_key(key, None)?;
            Ok(match table.remove(key) {
                Some(removed) => (true, vec![removed_event(store, &removed, ChangeCause::Delete)]),
                None => (false, Vec::new()),
            })
        })
        .await
    }

    /// Remove every record of a store. Returns how many were removed.
    pub async fn clear(&self, store: &str) -> Result<usize, SyncError> {
        self.commit(store, |table| {
            let events: Vec<ChangeEvent> = table
                .clear()
                .iter()
                .map(|r| removed_event(store, r, ChangeCause::Clear))
                .collect();
            Ok((events.len(), events))
        })
        .await
    }

    /// Controller write: set (`Some`) or remove (`None`) one record.
    ///
    /// Writing the value a record already holds only toggles its pending
    /// marker, so a confirmation of an optimistic value does not bump the
    /// version.
    pub(crate) async fn apply(
        &self,
        store: &str,
        key: &Key,
        desired: Option<Value>,
        kind: WriteKind,
    ) -> Result<Option<StoredRecord>, SyncError> {
        let pending = kind == WriteKind::Optimistic;
        let cause = kind.cause();
        self.commit(store, |table| {
            match &desired {
                Some(value) => check_value(table.schema(), key, value)?,
                None => table.schema().check_key(key, None)?,
            }
            let current = table.get(key).cloned();
            match (desired, current) {
                (None, None) => Ok((None, Vec::new())),
                (None, Some(_)) => {
                    let removed = table.remove(key);
                    let events = removed
                        .iter()
                        .map(|r| removed_event(store, r, cause))
                        .collect();
                    Ok((None, events))
                }
                (Some(value), Some(current)) if current.value == value => {
                    if current.pending == pending {
                        return Ok((Some(current), Vec::new()));
                    }
                    let record = StoredRecord { pending, ..current };
                    table.insert(record.clone());
                    let event = changed(store, &record, cause);
                    Ok((Some(record), vec![event]))
                }
                (Some(value), current) => {
                    let record = StoredRecord {
                        key: key.clone(),
                        value,
                        version: current.map_or(1, |c| c.version + 1),
                        pending,
                    };
                    table.insert(record.clone());
                    let event = changed(store, &record, cause);
                    Ok((Some(record), vec![event]))
                }
            }
        })
        .await
    }

    /// Replace the full contents of one store in a single write. Versions
    /// never go down: an unchanged record keeps its version, a changed one
    /// gets the larger of its bumped local version and the incoming one.
    pub(crate) async fn replace_all(
        &self,
        store: &str,
        rows: Vec<(Key, Value, Option<u64>)>,
    ) -> Result<usize, SyncError> {
        self.commit(store, |table| {
            let previous: BTreeMap<Key, StoredRecord> = table
                .clear()
                .into_iter()
                .map(|r| (r.key.clone(), r))
                .collect();
            let mut events = Vec::new();
            for (key, value, incoming) in rows {
                let incoming = incoming.unwrap_or(0);
                let old = previous.get(&key);
                let version = match old {
                    Some(old) if old.value == value && !old.pending => old.version.max(incoming),
                    Some(old) => (old.version + 1).max(incoming),
                    None => incoming.max(1),
                };
                let record = StoredRecord {
                    key,
                    value,
                    version,
                    pending: false,
                };
                if old != Some(&record) {
                    events.push(changed(store, &record, ChangeCause::Imported));
                }
                table.insert(record);
            }
            for old in previous.values() {
                if table.get(&old.key).is_none() {
                    events.push(removed_event(store, old, ChangeCause::Imported));
                }
            }
            Ok((table.len(), events))
        })
        .await
    }

    fn with_table<T>(
        &self,
        store: &str,
        f: impl FnOnce(&Table) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let tables = self
            .shared
            .tables
            .read()
            .map_err(|_| StorageError::LockPoisoned("local store read"))?;
        let table = tables
            .get(store)
            .ok_or_else(|| SchemaError::UnknownStore(store.to_string()))?;
        f(table)
    }

    /// Serialize writers of one store, apply `f` to a copy of its table,
    /// persist the copy, then swap it in and notify subscribers.
    async fn commit<T, F>(&self, store: &str, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut Table) -> Result<(T, Vec<ChangeEvent>), SyncError>,
    {
        self.open().await?;
        let lock = self
            .shared
            .write_locks
            .get(store)
            .ok_or_else(|| SchemaError::UnknownStore(store.to_string()))?;
        let _guard = lock.lock().await;

        let mut next = self.with_table(store, |table| Ok(table.clone()))?;
        let (result, events) = f(&mut next)?;
        if events.is_empty() {
            return Ok(result);
        }

        let bytes = next.encode()?;
        let blob = store_blob(store);
        retrying(&self.shared.retry, "write", &blob, || {
            self.shared.backend.write(&blob, bytes.clone())
        })
        .await?;

        self.shared
            .tables
            .write()
            .map_err(|_| StorageError::LockPoisoned("local store write"))?
            .insert(store.to_string(), next);
        debug!(store, changes = events.len(), "store committed");
        for event in &events {
            self.shared.subscribers.notify(event);
        }
        Ok(result)
    }

    async fn initialize(&self) -> Result<(), SyncError> {
        let shared = &self.shared;
        let registry = &shared.registry;
        registry.validate()?;

        let persisted = self.read_meta().await?;
        let declared = registry.describe();
        if let Some(persisted) = &persisted {
            registry.check_version(persisted)?;
        }

        let mut loaded = BTreeMap::new();
        if let Some(persisted) = &persisted {
            for (name, store) in &persisted.stores {
                let blob = store_blob(name);
                let bytes = retrying(&shared.retry, "read", &blob, || shared.backend.read(&blob)).await?;
                let schema = persisted_schema(name, store);
                let table = match bytes {
                    Some(bytes) => Table::decode(schema, &blob, &bytes)?,
                    None => Table::new(schema),
                };
                loaded.insert(name.clone(), table);
            }
            let mut ctx = MigrationContext::new(&mut loaded);
            for migration in registry.migrations_after(persisted.version) {
                info!(version = migration.version, description = %migration.description, "running schema migration");
                (migration.step)(&mut ctx).map_err(|e| SchemaError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
            }
            // nothing has been written yet, so a refusal leaves the data as it was
            registry.check_upgrade(persisted, &ctx.into_touched())?;
        }

        let mut tables = BTreeMap::new();
        for schema in registry.stores() {
            let table = match loaded.remove(&schema.name) {
                Some(table) => {
                    let (table, dropped) = table.rebuild(schema.clone());
                    if dropped > 0 {
                        warn!(store = %schema.name, dropped, "records without a valid key dropped during upgrade");
                    }
                    table
                }
                None => Table::new(schema.clone()),
            };
            tables.insert(schema.name.clone(), table);
        }

        if persisted.as_ref() != Some(&declared) {
            if let Some(persisted) = &persisted {
                for name in persisted.stores.keys().filter(|n| !registry.contains(n)) {
                    let blob = store_blob(name);
                    retrying(&shared.retry, "remove", &blob, || shared.backend.remove(&blob)).await?;
                }
                for (name, table) in &tables {
                    let blob = store_blob(name);
                    let bytes = table.encode()?;
                    retrying(&shared.retry, "write", &blob, || {
                        shared.backend.write(&blob, bytes.clone())
                    })
                    .await?;
                }
                info!(from = persisted.version, to = registry.version(), "local store schema upgraded");
            }
            let meta = serde_json::to_vec(&declared).map_err(|e| StorageError::Encoding(e.to_string()))?;
            retrying(&shared.retry, "write", SCHEMA_BLOB, || {
                shared.backend.write(SCHEMA_BLOB, meta.clone())
            })
            .await?;
        }

        let count = tables.len();
        *shared
            .tables
            .write()
            .map_err(|_| StorageError::LockPoisoned("local store open"))? = tables;
        info!(version = registry.version(), stores = count, "local store opened");
        Ok(())
    }

    async fn read_meta(&self) -> Result<Option<PersistedSchema>, StorageError> {
        let shared = &self.shared;
        let bytes = retrying(&shared.retry, "read", SCHEMA_BLOB, || {
            shared.backend.read(SCHEMA_BLOB)
        })
        .await?;
        bytes
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                    name: SCHEMA_BLOB.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

fn persisted_schema(name: &str, store: &PersistedStore) -> StoreSchema {
    let mut schema = StoreSchema::new(name, store.key.clone());
    schema.indices = store
        .indices
        .iter()
        .map(|(index, shape)| IndexSchema {
            name: index.clone(),
            shape: shape.clone(),
        })
        .collect();
    schema
}

fn check_value(schema: &StoreSchema, key: &Key, value: &Value) -> Result<(), SchemaError> {
    if !value.is_object() {
        return Err(SchemaError::InvalidRecord {
            store: schema.name.clone(),
            reason: "record is not a JSON object".into(),
        });
    }
    schema.check_key(key, Some(value))
}

fn changed(store: &str, record: &StoredRecord, cause: ChangeCause) -> ChangeEvent {
    ChangeEvent {
        store: store.to_string(),
        key: record.key.clone(),
        value: Some(record.value.clone()),
        version: record.version,
        pending: record.pending,
        cause,
    }
}

fn removed_event(store: &str, record: &StoredRecord, cause: ChangeCause) -> ChangeEvent {
    ChangeEvent {
        store: store.to_string(),
        key: record.key.clone(),
        value: None,
        version: record.version,
        pending: false,
        cause,
    }
}
