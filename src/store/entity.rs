//! EntityStore - typed accessor over one store of a [`LocalStore`].

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{SchemaError, StorageError, SyncError};
use crate::key::Key;

use super::{LocalStore, StoredRecord};

/// Trait for entity types mirrored in a store.
///
/// Usually derived:
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Record)]
/// #[record(store = "channel_follows")]
/// struct ChannelFollow {
///     #[record(key)]
///     user_id: String,
///     #[record(key)]
///     channel_username: String,
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The store this type lives in.
    const STORE: &'static str;

    /// Primary key of this instance.
    fn key(&self) -> Key;
}

/// A record together with its store version and pending marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
    pub pending: bool,
}

/// Typed view of one store.
pub struct EntityStore<'a, R> {
    store: &'a LocalStore,
    _marker: PhantomData<R>,
}

impl<'a, R: Record> EntityStore<'a, R> {
    pub fn new(store: &'a LocalStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self, key: &Key) -> Result<Option<Versioned<R>>, SyncError> {
        self.store
            .get(R::STORE, key)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn get_all(&self) -> Result<Vec<Versioned<R>>, SyncError> {
        self.store
            .get_all(R::STORE)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn put(&self, record: &R) -> Result<Versioned<R>, SyncError> {
        let stored = self.store.put(R::STORE, record.key(), encode(record)?).await?;
        Ok(Versioned {
            data: record.clone(),
            version: stored.version,
            pending: stored.pending,
        })
    }

    /// Delete by key. Returns true if the record existed.
    pub async fn delete(&self, key: &Key) -> Result<bool, SyncError> {
        self.store.delete(R::STORE, key).await
    }

    pub async fn query_by_index(&self, index: &str, value: &Key) -> Result<Vec<Versioned<R>>, SyncError> {
        self.store
            .query_by_index(R::STORE, index, value)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn clear(&self) -> Result<usize, SyncError> {
        self.store.clear(R::STORE).await
    }
}

pub(crate) fn encode<R: Record>(record: &R) -> Result<Value, SyncError> {
    serde_json::to_value(record).map_err(|e| StorageError::Encoding(e.to_string()).into())
}

fn decode<R: Record>(stored: StoredRecord) -> Result<Versioned<R>, SyncError> {
    let data = serde_json::from_value(stored.value).map_err(|e| SchemaError::InvalidRecord {
        store: R::STORE.to_string(),
        reason: format!("record {}: {}", stored.key, e),
    })?;
    Ok(Versioned {
        data,
        version: stored.version,
        pending: stored.pending,
    })
}
