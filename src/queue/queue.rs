use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::config::StorageRetry;
use crate::error::{MutationFailed, StorageError};
use crate::store::{retrying, StorageBackend};

use super::{MutationTarget, QueuedMutation, RemoteCall};

const QUEUE_BLOB: &str = "mutation_queue";

/// Outcome of delivering one queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The backend confirmed the write; the record is removed.
    Confirmed,
    /// Attempts ran out and the target was rolled back; the record is removed.
    Failed(MutationFailed),
    /// A newer intent took over the target while delivering.
    Superseded,
    /// Delivery stopped before a final answer (connectivity lost, storage
    /// failure). The record stays queued.
    Interrupted,
}

/// Delivers queued mutations to the backend on behalf of [`MutationQueue::drain`].
#[async_trait]
pub trait MutationSink: Send + Sync {
    async fn deliver(&self, queue: &MutationQueue, mutation: QueuedMutation) -> Delivery;
}

/// Result of a drain cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainReport {
    pub confirmed: usize,
    pub failed: Vec<MutationFailed>,
    pub superseded: usize,
    /// The cycle stopped early; remaining records wait for the next one.
    pub interrupted: bool,
    /// Another drain was already running, nothing was done.
    pub skipped: bool,
    /// Records still queued when the cycle ended.
    pub remaining: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct QueueState {
    next_seq: u64,
    records: Vec<QueuedMutation>,
    #[serde(skip)]
    loaded: bool,
}

/// Durable FIFO of mutations not yet confirmed by the backend.
///
/// At most one record exists per target: enqueueing for a target that is
/// already queued replaces that record in place. Every change is persisted
/// before it becomes visible, so the queue survives restarts.
pub struct MutationQueue {
    backend: Arc<dyn StorageBackend>,
    retry: StorageRetry,
    state: Mutex<QueueState>,
    draining: AtomicBool,
}

impl MutationQueue {
    pub fn new(backend: Arc<dyn StorageBackend>, retry: StorageRetry) -> Self {
        Self {
            backend,
            retry,
            state: Mutex::new(QueueState::default()),
            draining: AtomicBool::new(false),
        }
    }

    /// Load the persisted queue. Returns how many records are waiting.
    pub async fn open(&self) -> Result<usize, StorageError> {
        Ok(self.state().await?.records.len())
    }

    /// Append a mutation, or collapse it into the record already queued for
    /// the same target (same position, refreshed payload, attempts reset,
    /// original `rollback_to` kept).
    pub async fn enqueue(
        &self,
        target: MutationTarget,
        desired: Option<Value>,
        rollback_to: Option<Value>,
        call: RemoteCall,
    ) -> Result<QueuedMutation, StorageError> {
        let mut state = self.state().await?;
        let mut next = state.clone();
        let now = SystemTime::now();

        let record = match next.records.iter().position(|r| r.target == target) {
            Some(index) => {
                let existing = &mut next.records[index];
                existing.revision += 1;
                existing.desired = desired;
                existing.call = call;
                existing.created_at = now;
                existing.attempts = 0;
                existing.last_error = None;
                debug!(entity = %target, seq = existing.seq, revision = existing.revision, "queued mutation collapsed");
                existing.clone()
            }
            None => {
                next.next_seq += 1;
                let record = QueuedMutation {
                    seq: next.next_seq,
                    revision: 0,
                    target,
                    desired,
                    rollback_to,
                    call,
                    created_at: now,
                    attempts: 0,
                    last_error: None,
                };
                debug!(entity = %record.target, seq = record.seq, "mutation queued");
                next.records.push(record.clone());
                record
            }
        };

        self.commit(&mut state, next).await?;
        Ok(record)
    }

    /// All queued records in queue order.
    pub async fn peek_all(&self) -> Result<Vec<QueuedMutation>, StorageError> {
        Ok(self.state().await?.records.clone())
    }

    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state().await?.records.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    pub async fn pending_for(&self, target: &MutationTarget) -> Result<Option<QueuedMutation>, StorageError> {
        Ok(self
            .state()
            .await?
            .records
            .iter()
            .find(|r| &r.target == target)
            .cloned())
    }

    /// Count an attempt of revision `revision` of record `seq`, noting the
    /// previous attempt's error. Returns false if the record is gone or was
    /// collapsed into a newer revision.
    pub async fn record_attempt(
        &self,
        seq: u64,
        revision: u64,
        last_error: Option<String>,
    ) -> Result<bool, StorageError> {
        let mut state = self.state().await?;
        let mut next = state.clone();
        let Some(record) = next
            .records
            .iter_mut()
            .find(|r| r.seq == seq && r.revision == revision)
        else {
            return Ok(false);
        };
        record.attempts += 1;
        if last_error.is_some() {
            record.last_error = last_error;
        }
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    /// Remember why revision `revision` of record `seq` has not gone through
    /// yet, without counting an attempt.
    pub async fn note_error(&self, seq: u64, revision: u64, error: String) -> Result<bool, StorageError> {
        let mut state = self.state().await?;
        let mut next = state.clone();
        let Some(record) = next
            .records
            .iter_mut()
            .find(|r| r.seq == seq && r.revision == revision)
        else {
            return Ok(false);
        };
        record.last_error = Some(error);
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    /// Remove a record, but only the given revision of it.
    pub async fn remove(&self, seq: u64, revision: u64) -> Result<bool, StorageError> {
        let mut state = self.state().await?;
        let mut next = state.clone();
        let before = next.records.len();
        next.records.retain(|r| !(r.seq == seq && r.revision == revision));
        if next.records.len() == before {
            return Ok(false);
        }
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    /// Point the rollback value of a queued target at a new baseline.
    pub async fn rebase(&self, target: &MutationTarget, rollback_to: Option<Value>) -> Result<bool, StorageError> {
        let mut state = self.state().await?;
        let mut next = state.clone();
        let Some(record) = next.records.iter_mut().find(|r| &r.target == target) else {
            return Ok(false);
        };
        if record.rollback_to == rollback_to {
            return Ok(true);
        }
        record.rollback_to = rollback_to;
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Deliver queued records strictly in queue order until the queue is
    /// empty or a delivery is interrupted.
    ///
    /// Does nothing (reporting `skipped`) while another drain is running.
    /// Each removal is persisted before the next record starts, so an
    /// interrupted drain resumes where it stopped.
    pub async fn drain<S: MutationSink + ?Sized>(&self, sink: &S) -> Result<DrainReport, StorageError> {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("drain already in progress");
            return Ok(DrainReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _draining = DrainingFlag(&self.draining);

        let mut report = DrainReport::default();
        let mut last: Option<(u64, u64)> = None;
        loop {
            let Some(head) = self.state().await?.records.first().cloned() else {
                break;
            };
            let (seq, revision) = (head.seq, head.revision);
            // the same revision again means its delivery made no progress
            if last == Some((seq, revision)) {
                break;
            }
            last = Some((seq, revision));

            match sink.deliver(self, head).await {
                Delivery::Confirmed => {
                    self.remove(seq, revision).await?;
                    report.confirmed += 1;
                }
                Delivery::Failed(failed) => {
                    self.remove(seq, revision).await?;
                    report.failed.push(failed);
                }
                Delivery::Superseded => report.superseded += 1,
                Delivery::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        report.remaining = self.len().await?;
        info!(
            confirmed = report.confirmed,
            failed = report.failed.len(),
            superseded = report.superseded,
            interrupted = report.interrupted,
            remaining = report.remaining,
            "mutation queue drained"
        );
        Ok(report)
    }

    async fn state(&self) -> Result<MutexGuard<'_, QueueState>, StorageError> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            let bytes = retrying(&self.retry, "read", QUEUE_BLOB, || self.backend.read(QUEUE_BLOB)).await?;
            let mut loaded = match bytes {
                Some(bytes) => serde_json::from_slice::<QueueState>(&bytes).map_err(|e| {
                    StorageError::Corrupt {
                        name: QUEUE_BLOB.to_string(),
                        reason: e.to_string(),
                    }
                })?,
                None => QueueState::default(),
            };
            loaded.loaded = true;
            if !loaded.records.is_empty() {
                info!(records = loaded.records.len(), "mutation queue restored");
            }
            *state = loaded;
        }
        Ok(state)
    }

    async fn commit(&self, state: &mut QueueState, next: QueueState) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&next).map_err(|e| StorageError::Encoding(e.to_string()))?;
        retrying(&self.retry, "write", QUEUE_BLOB, || {
            self.backend.write(QUEUE_BLOB, bytes.clone())
        })
        .await?;
        *state = next;
        Ok(())
    }
}

struct DrainingFlag<'a>(&'a AtomicBool);

impl Drop for DrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
