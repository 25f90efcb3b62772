//! The contract this crate expects from the hosted backend.

#[cfg(feature = "http")]
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::queue::{RemoteCall, VerifyRead};
use crate::snapshot::Snapshot;

#[cfg(feature = "http")]
pub use http::HttpRemote;

/// Backend operations used by the optimistic controller and pull sync.
///
/// Every [`RemoteCall`] is an idempotent upsert-or-delete, so implementations
/// may be called more than once for the same intent.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Perform the write. `Ok(Some(record))` carries the backend's canonical
    /// record; `Ok(None)` means the desired value stands as written.
    async fn execute(&self, call: &RemoteCall) -> Result<Option<Value>, RemoteError>;

    /// Read back what the backend holds after a write, `None` if absent.
    async fn read_back(&self, verify: &VerifyRead, input: &Value) -> Result<Option<Value>, RemoteError> {
        let _ = input;
        Err(RemoteError::Unsupported(format!("read-back `{}`", verify.command)))
    }

    /// Export the stores mirrored for `user_id`.
    async fn fetch_snapshot(&self, user_id: &str) -> Result<Snapshot, RemoteError> {
        let _ = user_id;
        Err(RemoteError::Unsupported("snapshot pull".into()))
    }
}

#[async_trait]
impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    async fn execute(&self, call: &RemoteCall) -> Result<Option<Value>, RemoteError> {
        (**self).execute(call).await
    }

    async fn read_back(&self, verify: &VerifyRead, input: &Value) -> Result<Option<Value>, RemoteError> {
        (**self).read_back(verify, input).await
    }

    async fn fetch_snapshot(&self, user_id: &str) -> Result<Snapshot, RemoteError> {
        (**self).fetch_snapshot(user_id).await
    }
}
