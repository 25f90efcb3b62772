use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::controller::InFlight;
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::{MutationQueue, MutationTarget};
use crate::schema::StoreSchema;
use crate::store::{LocalStore, WriteKind};

use super::Snapshot;

/// Reserved record field carrying the backend's version of a record. It is
/// stripped before the record is stored.
const VERSION_FIELD: &str = "_version";

/// A snapshot record that failed validation and was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedRecord {
    pub store: String,
    /// Position of the record in the snapshot's list for its store.
    pub index: usize,
    pub reason: String,
}

/// A store whose replacement failed; its previous contents are intact.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreFailure {
    pub store: String,
    pub error: SyncError,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportReport {
    /// Records now held by each replaced store.
    pub imported: BTreeMap<String, usize>,
    /// Snapshot stores this client does not declare.
    pub ignored: Vec<String>,
    pub rejected: Vec<RejectedRecord>,
    pub failed: Vec<StoreFailure>,
    /// Pending local intents re-applied over the imported data.
    pub replayed: usize,
}

impl ImportReport {
    /// Whether every declared store in the snapshot was replaced.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Replaces local stores wholesale from a [`Snapshot`].
///
/// Each store is validated and replaced in one write, so a failure leaves
/// that store as it was and never half-imported. Stores the snapshot does
/// not mention are left alone. Local intents not yet confirmed (queued or in
/// flight) are re-applied on top of the imported data, and their rollback
/// values move to the imported ones.
pub struct SnapshotImporter {
    store: LocalStore,
    queue: Arc<MutationQueue>,
    in_flight: Option<Arc<InFlight>>,
}

impl SnapshotImporter {
    pub fn new(store: LocalStore, queue: Arc<MutationQueue>) -> Self {
        Self {
            store,
            queue,
            in_flight: None,
        }
    }

    pub(crate) fn with_in_flight(mut self, in_flight: Arc<InFlight>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    pub async fn import_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<ImportReport, SyncError> {
        self.store.open().await?;
        let mut report = ImportReport::default();
        let mut replaced = BTreeSet::new();

        for (name, records) in snapshot.stores() {
            let schema = match self.store.schema(name) {
                Ok(schema) => schema.clone(),
                Err(_) => {
                    warn!(store = name, "snapshot store not declared locally, ignored");
                    report.ignored.push(name.to_string());
                    continue;
                }
            };

            // later duplicates of a key win
            let mut rows: BTreeMap<Key, (Value, Option<u64>)> = BTreeMap::new();
            for (index, record) in records.iter().enumerate() {
                match validate(&schema, user_id, record) {
                    Ok((key, value, version)) => {
                        rows.insert(key, (value, version));
                    }
                    Err(reason) => {
                        warn!(store = name, index, reason = %reason, "snapshot record rejected");
                        report.rejected.push(RejectedRecord {
                            store: name.to_string(),
                            index,
                            reason,
                        });
                    }
                }
            }

            let rows = rows
                .into_iter()
                .map(|(key, (value, version))| (key, value, version))
                .collect();
            match self.store.replace_all(name, rows).await {
                Ok(count) => {
                    report.imported.insert(name.to_string(), count);
                    replaced.insert(name.to_string());
                }
                Err(SyncError::Closed) => return Err(SyncError::Closed),
                Err(err) => {
                    error!(store = name, error = %err, "snapshot import of store failed");
                    report.failed.push(StoreFailure {
                        store: name.to_string(),
                        error: err,
                    });
                }
            }
        }

        report.replayed = self.replay(&replaced).await?;
        info!(
            user_id,
            stores = report.imported.len(),
            ignored = report.ignored.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            replayed = report.replayed,
            "snapshot imported"
        );
        Ok(report)
    }

    /// Re-apply queued intents (in queue order) and then in-flight ones over
    /// the replaced stores.
    async fn replay(&self, replaced: &BTreeSet<String>) -> Result<usize, SyncError> {
        let mut replayed = BTreeSet::new();

        for queued in self.queue.peek_all().await? {
            if !replaced.contains(&queued.target.store) {
                continue;
            }
            self.overlay(&queued.target, queued.desired.clone()).await?;
            replayed.insert(queued.target);
        }

        if let Some(in_flight) = &self.in_flight {
            for (target, desired) in in_flight.active() {
                if !replaced.contains(&target.store) || replayed.contains(&target) {
                    continue;
                }
                self.overlay(&target, desired).await?;
                replayed.insert(target);
            }
        }
        Ok(replayed.len())
    }

    async fn overlay(&self, target: &MutationTarget, desired: Option<Value>) -> Result<(), SyncError> {
        let baseline = self
            .store
            .get(&target.store, &target.key)
            .await?
            .map(|record| record.value);
        self.queue.rebase(target, baseline.clone()).await?;
        if let Some(in_flight) = &self.in_flight {
            in_flight.rebase(target, baseline);
        }
        self.store
            .apply(&target.store, &target.key, desired, WriteKind::Optimistic)
            .await?;
        Ok(())
    }
}

/// Check one snapshot record against its store's declared shape.
fn validate(schema: &StoreSchema, user_id: &str, record: &Value) -> Result<(Key, Value, Option<u64>), String> {
    let mut value = record.clone();
    let object = value
        .as_object_mut()
        .ok_or_else(|| "record is not a JSON object".to_string())?;

    let version = match object.remove(VERSION_FIELD) {
        None => None,
        Some(v) => Some(
            v.as_u64()
                .ok_or_else(|| format!("`{}` is not a non-negative integer", VERSION_FIELD))?,
        ),
    };

    if let Some(missing) = schema.missing_field(&value) {
        return Err(format!("missing required field `{}`", missing));
    }

    if let Some(owner) = &schema.owner {
        if value.get(owner).and_then(Value::as_str) != Some(user_id) {
            return Err(format!("`{}` does not match the importing user", owner));
        }
    }

    let key = schema.key.extract(&value)?;
    Ok((key, value, version))
}
