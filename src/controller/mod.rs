//! Optimistic mutations: write locally first, confirm with the backend,
//! retry with backoff, roll back on exhaustion.
//!
//! Every toggle-like feature goes through [`OptimisticController::mutate`];
//! features only supply the [`RemoteCall`] and, optionally, a verification
//! read.
//!
//! ```ignore
//! let follow = ChannelFollow::new("u1", "alice");
//! let call = RemoteCall::new("follows.follow", json!({ "user_id": "u1", "channel_username": "alice" }));
//! match controller.mutate(Mutation::upsert(&follow, call)?).await {
//!     Ok(MutationOutcome::Confirmed(_)) => {}
//!     Ok(MutationOutcome::Deferred { .. }) => { /* offline, queued */ }
//!     Ok(MutationOutcome::Superseded) => {}
//!     Err(SyncError::MutationFailed(failed)) => toast(&failed),
//!     Err(err) => return Err(err),
//! }
//! ```

mod chain;
mod in_flight;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{MutationFailed, SchemaError, SyncError};
use crate::key::Key;
use crate::queue::{Delivery, MutationQueue, MutationSink, MutationTarget, QueuedMutation, RemoteCall};
use crate::remote::RemoteApi;
use crate::store::{LocalStore, Record, WriteKind};

use chain::{Chain, ChainEnd};

use in_flight::Claim;
pub(crate) use in_flight::InFlight;

/// Where a mutation currently stands for its target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MutationState {
    #[default]
    Idle,
    /// Written locally, not yet sent (or queued while offline).
    Applied,
    /// Remote call in progress.
    Verifying,
    Confirmed,
    RolledBack,
}

/// A local write intent: set (`Some`) or remove (`None`) one record, and the
/// backend call that makes it durable.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub target: MutationTarget,
    pub desired: Option<Value>,
    pub call: RemoteCall,
}

impl Mutation {
    pub fn put(store: impl Into<String>, key: impl Into<Key>, value: Value, call: RemoteCall) -> Self {
        Self {
            target: MutationTarget::new(store, key),
            desired: Some(value),
            call,
        }
    }

    pub fn delete(store: impl Into<String>, key: impl Into<Key>, call: RemoteCall) -> Self {
        Self {
            target: MutationTarget::new(store, key),
            desired: None,
            call,
        }
    }

    pub fn upsert<R: Record>(record: &R, call: RemoteCall) -> Result<Self, SyncError> {
        Ok(Self::put(R::STORE, record.key(), crate::store::encode(record)?, call))
    }

    pub fn remove<R: Record>(key: impl Into<Key>, call: RemoteCall) -> Self {
        Self::delete(R::STORE, key, call)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    /// The backend accepted the write; carries the value now stored.
    Confirmed(Option<Value>),
    /// Applied locally and queued for delivery (offline, or an earlier
    /// intent for the same target is still queued or being sent).
    Deferred { seq: u64 },
    /// A newer intent for the same target took over.
    Superseded,
}

/// Applies mutations optimistically and reconciles them with the backend.
///
/// At most one remote call is in the air per target. A newer intent
/// supersedes the running chain, which stops silently before its next
/// attempt; an intent issued while a call is still in the air is queued and
/// delivered once that call has landed. When a
/// chain fails for good the target is restored to the value it had before
/// the first of the overlapping intents.
pub struct OptimisticController<R> {
    store: LocalStore,
    queue: Arc<MutationQueue>,
    connectivity: ConnectivityMonitor,
    remote: R,
    policy: RetryPolicy,
    in_flight: Arc<InFlight>,
}

impl<R: RemoteApi> OptimisticController<R> {
    pub fn new(
        store: LocalStore,
        queue: Arc<MutationQueue>,
        connectivity: ConnectivityMonitor,
        remote: R,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            connectivity,
            remote,
            policy,
            in_flight: Arc::new(InFlight::new()),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// State of the mutation currently running for `target`. Settled
    /// targets are no longer tracked and report `Idle`; the outcome of
    /// [`OptimisticController::mutate`] carries the terminal state.
    pub fn state(&self, target: &MutationTarget) -> MutationState {
        self.in_flight.state(target)
    }

    pub(crate) fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// Apply `mutation` locally, then confirm it with the backend.
    ///
    /// Offline, while an earlier intent for the same target is queued, or
    /// while a call for the target is still in the air, the mutation is
    /// queued and `Deferred` is returned. Online it is sent
    /// right away with bounded retry; on exhaustion the target is rolled
    /// back and [`SyncError::MutationFailed`] is returned.
    pub async fn mutate(&self, mutation: Mutation) -> Result<MutationOutcome, SyncError> {
        let Mutation { target, desired, call } = mutation;
        let schema = self.store.schema(&target.store)?;
        if schema.sync_only {
            return Err(SchemaError::SyncOnly(target.store.clone()).into());
        }
        schema.check_key(&target.key, desired.as_ref())?;
        if let Some(value) = &desired {
            let reason = if !value.is_object() {
                Some("record is not a JSON object".to_string())
            } else {
                schema
                    .missing_field(value)
                    .map(|field| format!("missing required field `{}`", field))
            };
            if let Some(reason) = reason {
                return Err(SchemaError::InvalidRecord {
                    store: target.store.clone(),
                    reason,
                }
                .into());
            }
        }

        let queued = self.queue.pending_for(&target).await?;
        let fallback = match &queued {
            Some(queued) => queued.rollback_to.clone(),
            None => self
                .store
                .get(&target.store, &target.key)
                .await?
                .map(|record| record.value),
        };
        let Claim {
            generation,
            baseline,
            gate,
        } = self.in_flight.claim(&target, desired.clone(), fallback);

        if let Err(err) = self
            .store
            .apply(&target.store, &target.key, desired.clone(), WriteKind::Optimistic)
            .await
        {
            error!(entity = %target, error = %err, "optimistic write failed");
            drop(gate);
            self.in_flight.release(&target, generation);
            return Err(err);
        }
        debug!(entity = %target, generation, "mutation applied");

        // an earlier call for this target is still in the air: queue behind it
        let busy = gate.try_lock().is_err();
        if queued.is_some() || busy || !self.connectivity.is_online() {
            drop(gate);
            return self.defer(&target, generation, desired, baseline, call, None).await;
        }

        let end = self
            .run_chain(Chain {
                target: &target,
                generation,
                desired: &desired,
                call: &call,
                spent: 0,
                queued: None,
                gate: &gate,
            })
            .await;
        drop(gate);

        match end {
            ChainEnd::Confirmed(value) => self.confirm(&target, generation, value).await,
            ChainEnd::Superseded => {
                self.in_flight.release(&target, generation);
                Ok(MutationOutcome::Superseded)
            }
            ChainEnd::Offline { last_error } => {
                let baseline = self.current_baseline(&target, generation, baseline);
                self.defer(&target, generation, desired, baseline, call, last_error).await
            }
            ChainEnd::Exhausted { attempts, reason } => {
                let baseline = self.current_baseline(&target, generation, baseline);
                self.roll_back(&target, generation, baseline, attempts, reason)
                    .await
            }
            ChainEnd::Storage(err) => {
                self.in_flight.release(&target, generation);
                Err(err.into())
            }
        }
    }

    async fn defer(
        &self,
        target: &MutationTarget,
        generation: u64,
        desired: Option<Value>,
        baseline: Option<Value>,
        call: RemoteCall,
        last_error: Option<String>,
    ) -> Result<MutationOutcome, SyncError> {
        let result = self.queue.enqueue(target.clone(), desired, baseline, call).await;
        self.in_flight.release(target, generation);
        let queued = result?;
        if let Some(error) = last_error {
            self.queue.note_error(queued.seq, queued.revision, error).await?;
        }
        debug!(entity = %target, seq = queued.seq, revision = queued.revision, "mutation deferred");
        Ok(MutationOutcome::Deferred { seq: queued.seq })
    }

    async fn confirm(
        &self,
        target: &MutationTarget,
        generation: u64,
        value: Option<Value>,
    ) -> Result<MutationOutcome, SyncError> {
        if !self.in_flight.is_latest(target, generation) {
            self.in_flight.release(target, generation);
            return Ok(MutationOutcome::Superseded);
        }
        let result = self
            .store
            .apply(&target.store, &target.key, value.clone(), WriteKind::Confirmed)
            .await;
        self.in_flight.set_state(target, generation, MutationState::Confirmed);
        self.in_flight.release(target, generation);
        result?;
        debug!(entity = %target, "mutation confirmed");
        Ok(MutationOutcome::Confirmed(value))
    }

    async fn roll_back(
        &self,
        target: &MutationTarget,
        generation: u64,
        baseline: Option<Value>,
        attempts: u32,
        reason: String,
    ) -> Result<MutationOutcome, SyncError> {
        if !self.in_flight.is_latest(target, generation) {
            self.in_flight.release(target, generation);
            return Ok(MutationOutcome::Superseded);
        }
        let result = self
            .store
            .apply(&target.store, &target.key, baseline.clone(), WriteKind::RolledBack)
            .await;
        self.in_flight.set_state(target, generation, MutationState::RolledBack);
        self.in_flight.release(target, generation);
        result?;
        warn!(entity = %target, attempts, reason = %reason, "mutation rolled back");
        Err(MutationFailed {
            target: target.clone(),
            previous: baseline,
            attempts,
            reason,
        }
        .into())
    }

    /// The baseline may have moved onto imported data since the claim.
    fn current_baseline(&self, target: &MutationTarget, generation: u64, claimed: Option<Value>) -> Option<Value> {
        self.in_flight.baseline(target, generation).unwrap_or(claimed)
    }
}

#[async_trait]
impl<R: RemoteApi> MutationSink for OptimisticController<R> {
    /// Deliver a queued mutation, resuming its persisted attempt count.
    async fn deliver(&self, _queue: &MutationQueue, mutation: QueuedMutation) -> Delivery {
        let QueuedMutation {
            seq,
            revision,
            target,
            desired,
            rollback_to,
            call,
            attempts,
            last_error,
            ..
        } = mutation;

        if !self.connectivity.is_online() {
            return Delivery::Interrupted;
        }
        let Claim {
            generation,
            baseline,
            gate,
        } = self.in_flight.claim(&target, desired.clone(), rollback_to);
        let end = if attempts >= self.policy.max_attempts() {
            ChainEnd::Exhausted {
                attempts,
                reason: last_error.unwrap_or_else(|| "no attempts left".to_string()),
            }
        } else {
            self.run_chain(Chain {
                target: &target,
                generation,
                desired: &desired,
                call: &call,
                spent: attempts,
                queued: Some((seq, revision)),
                gate: &gate,
            })
            .await
        };
        drop(gate);

        let result = match end {
            ChainEnd::Confirmed(value) => self.confirm(&target, generation, value).await,
            ChainEnd::Superseded => {
                self.in_flight.release(&target, generation);
                Ok(MutationOutcome::Superseded)
            }
            ChainEnd::Offline { .. } => {
                self.in_flight.release(&target, generation);
                return Delivery::Interrupted;
            }
            ChainEnd::Exhausted { attempts, reason } => {
                let baseline = self.current_baseline(&target, generation, baseline);
                self.roll_back(&target, generation, baseline, attempts, reason)
                    .await
            }
            ChainEnd::Storage(err) => {
                error!(entity = %target, error = %err, "could not record delivery attempt");
                self.in_flight.release(&target, generation);
                return Delivery::Interrupted;
            }
        };

        match result {
            Ok(MutationOutcome::Superseded) => Delivery::Superseded,
            Ok(_) => Delivery::Confirmed,
            Err(SyncError::MutationFailed(failed)) => Delivery::Failed(failed),
            Err(err) => {
                error!(entity = %target, error = %err, "could not settle delivered mutation");
                Delivery::Interrupted
            }
        }
    }
}
