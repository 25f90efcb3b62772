use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::queue::MutationTarget;

/// Contract violations: unknown stores or indices, malformed keys, records
/// that do not match their store, and schema versions that cannot be opened.
///
/// Never retried; always propagated to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown store `{0}`")]
    UnknownStore(String),
    #[error("store `{store}` has no index `{index}`")]
    UnknownIndex { store: String, index: String },
    #[error("malformed key {key} for store `{store}`: {reason}")]
    MalformedKey {
        store: String,
        key: String,
        reason: String,
    },
    #[error("invalid record for store `{store}`: {reason}")]
    InvalidRecord { store: String, reason: String },
    #[error("store `{0}` is only written by snapshot import")]
    SyncOnly(String),
    #[error("invalid store name `{0}` (allowed: a-z, 0-9, `_`, `-`)")]
    InvalidName(String),
    #[error("persisted schema version {persisted} is newer than declared version {declared}")]
    Downgrade { persisted: u32, declared: u32 },
    #[error("incompatible change to store `{store}` without a migration: {reason}")]
    Incompatible { store: String, reason: String },
    #[error("migration to version {version} failed: {reason}")]
    Migration { version: u32, reason: String },
}

/// Failures of the local persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage i/o error on `{name}`: {reason}")]
    Io { name: String, reason: String },
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("corrupt blob `{name}`: {reason}")]
    Corrupt { name: String, reason: String },
    #[error("lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

/// Failures of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("not supported by this backend: {0}")]
    Unsupported(String),
}

impl RemoteError {
    /// Network failures and timeouts are worth another attempt; a rejection
    /// is the backend's final answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout(_))
    }
}

/// Terminal failure of an optimistic mutation after its retries ran out.
///
/// Carries the value the entity was rolled back to so the UI can keep
/// showing something sensible next to the error message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("mutation of {target} failed after {attempts} attempt(s): {reason}")]
pub struct MutationFailed {
    pub target: MutationTarget,
    pub previous: Option<Value>,
    pub attempts: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    MutationFailed(#[from] MutationFailed),
    #[error("local store is closed")]
    Closed,
}
