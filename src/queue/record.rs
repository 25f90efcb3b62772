use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::Key;

/// The entity a mutation writes: store name plus primary key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationTarget {
    pub store: String,
    pub key: Key,
}

impl MutationTarget {
    pub fn new(store: impl Into<String>, key: impl Into<Key>) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for MutationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.key)
    }
}

/// Read-back issued after a write to confirm the backend reflects it.
///
/// Only `fields` are compared; an empty list compares whole records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRead {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl VerifyRead {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fields: Vec::new(),
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a read-back value agrees with the desired one. `None` on both
    /// sides means the record is absent as intended.
    pub fn matches(&self, desired: Option<&Value>, actual: Option<&Value>) -> bool {
        match (desired, actual) {
            (None, None) => true,
            (Some(desired), Some(actual)) if self.fields.is_empty() => desired == actual,
            (Some(desired), Some(actual)) => self
                .fields
                .iter()
                .all(|field| desired.get(field) == actual.get(field)),
            _ => false,
        }
    }
}

/// Serializable descriptor of an idempotent upsert-or-delete on the backend.
///
/// `command` names the endpoint; `input` is its JSON body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub command: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyRead>,
}

impl RemoteCall {
    pub fn new(command: impl Into<String>, input: Value) -> Self {
        Self {
            command: command.into(),
            input,
            verify: None,
        }
    }

    pub fn with_verify(mut self, verify: VerifyRead) -> Self {
        self.verify = Some(verify);
        self
    }
}

/// A local mutation waiting for backend confirmation.
///
/// `seq` fixes the queue position. `revision` grows each time a newer intent
/// for the same target collapses into this record. `rollback_to` is the
/// value the target held before the first of those intents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub seq: u64,
    pub revision: u64,
    pub target: MutationTarget,
    pub desired: Option<Value>,
    pub rollback_to: Option<Value>,
    pub call: RemoteCall,
    pub created_at: SystemTime,
    pub attempts: u32,
    pub last_error: Option<String>,
}
