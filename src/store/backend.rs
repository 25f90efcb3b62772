use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::config::StorageRetry;
use crate::error::StorageError;

/// Persistence underneath a [`LocalStore`](crate::LocalStore) and the
/// [`MutationQueue`](crate::MutationQueue): a flat namespace of named blobs.
///
/// A `write` must replace the blob atomically: readers see either the old or
/// the new bytes, never a mix.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn write(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn remove(&self, name: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read(name).await
    }

    async fn write(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        (**self).write(name, bytes).await
    }

    async fn remove(&self, name: &str) -> Result<(), StorageError> {
        (**self).remove(name).await
    }
}

/// Run a backend operation up to `retry.attempts` times. Corrupt data is
/// never retried.
pub(crate) async fn retrying<T, F, Fut>(
    retry: &StorageRetry,
    op: &'static str,
    name: &str,
    mut f: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && !matches!(err, StorageError::Corrupt { .. }) => {
                warn!(blob = name, op, attempt, error = %err, "storage operation failed, retrying");
                tokio::time::sleep(retry.delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// In-memory backend backed by `Arc<RwLock<HashMap>>`.
///
/// Clone-friendly (cloning shares the same underlying storage), which is how
/// tests simulate a process restart: drop everything built on top, keep a
/// clone of the backend, open again.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all blobs currently stored.
    pub fn names(&self) -> Result<Vec<String>, StorageError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| StorageError::LockPoisoned("memory backend read"))?;
        let mut names: Vec<String> = blobs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| StorageError::LockPoisoned("memory backend read"))?;
        Ok(blobs.get(name).cloned())
    }

    async fn write(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| StorageError::LockPoisoned("memory backend write"))?;
        blobs.insert(name.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), StorageError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| StorageError::LockPoisoned("memory backend write"))?;
        blobs.remove(name);
        Ok(())
    }
}
