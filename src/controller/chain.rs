use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex as Gate;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{RemoteError, StorageError};
use crate::queue::{MutationTarget, RemoteCall, VerifyRead};
use crate::remote::RemoteApi;

use super::{MutationState, OptimisticController};

/// How an attempt chain ended.
#[derive(Debug)]
pub(super) enum ChainEnd {
    /// The backend acknowledged the write; carries the value to store.
    Confirmed(Option<Value>),
    /// A newer intent owns the target.
    Superseded,
    /// Connectivity dropped before the next attempt.
    Offline { last_error: Option<String> },
    /// Every attempt failed, or the backend rejected the write.
    Exhausted { attempts: u32, reason: String },
    /// Progress of a queued mutation could not be persisted.
    Storage(StorageError),
}

/// One run of attempts for a single intent.
pub(super) struct Chain<'a> {
    pub target: &'a MutationTarget,
    pub generation: u64,
    pub desired: &'a Option<Value>,
    pub call: &'a RemoteCall,
    /// Attempts already spent, for queued mutations resumed after a restart.
    pub spent: u32,
    /// `(seq, revision)` of the queued record being delivered.
    pub queued: Option<(u64, u64)>,
    pub gate: &'a Arc<Gate<()>>,
}

impl<R: RemoteApi> OptimisticController<R> {
    /// Attempt the remote call until it is confirmed, superseded, interrupted
    /// or out of attempts. The first attempt of a chain is immediate; each
    /// retry waits for the policy's backoff. Each attempt holds the target's
    /// gate, so it waits for a call another chain still has in the air.
    pub(super) async fn run_chain(&self, chain: Chain<'_>) -> ChainEnd {
        let target = chain.target;
        let max_attempts = self.policy.max_attempts();
        let mut last_error: Option<String> = None;

        for attempt in chain.spent..max_attempts {
            if attempt > chain.spent {
                sleep(self.policy.backoff(attempt)).await;
            }
            // one call per target at a time; a newer intent may take over
            // while this chain waits
            let _gate = Arc::clone(chain.gate).lock_owned().await;
            if !self.in_flight.is_latest(target, chain.generation) {
                debug!(entity = %target, attempt, "attempt chain superseded");
                return ChainEnd::Superseded;
            }
            if !self.connectivity.is_online() {
                debug!(entity = %target, attempt, "offline, leaving the rest to the queue");
                return ChainEnd::Offline { last_error };
            }
            if let Some((seq, revision)) = chain.queued {
                match self.queue.record_attempt(seq, revision, last_error.clone()).await {
                    Ok(true) => {}
                    Ok(false) => return ChainEnd::Superseded,
                    Err(err) => return ChainEnd::Storage(err),
                }
            }

            self.in_flight
                .set_state(target, chain.generation, MutationState::Verifying);
            debug!(entity = %target, command = %chain.call.command, attempt = attempt + 1, "calling backend");

            let failure = match self.attempt(chain.call).await {
                Ok(response) => {
                    let confirmed = response.or_else(|| chain.desired.clone());
                    let verified = match &chain.call.verify {
                        None => Ok(()),
                        Some(verify) => self.verify(verify, chain.call, confirmed.as_ref()).await,
                    };
                    match verified {
                        Ok(()) => return ChainEnd::Confirmed(confirmed),
                        Err(reason) => reason,
                    }
                }
                Err(err) if !err.is_retryable() => {
                    warn!(entity = %target, error = %err, "backend rejected mutation");
                    return ChainEnd::Exhausted {
                        attempts: attempt + 1,
                        reason: err.to_string(),
                    };
                }
                Err(err) => err.to_string(),
            };

            warn!(entity = %target, attempt = attempt + 1, max_attempts, error = %failure, "mutation attempt failed");
            last_error = Some(failure);
        }

        ChainEnd::Exhausted {
            attempts: max_attempts.max(chain.spent),
            reason: last_error.unwrap_or_else(|| "no attempts left".to_string()),
        }
    }

    async fn attempt(&self, call: &RemoteCall) -> Result<Option<Value>, RemoteError> {
        let limit = self.policy.attempt_timeout;
        match timeout(limit, self.remote.execute(call)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(limit)),
        }
    }

    /// Poll the backend until it reports the expected value.
    ///
    /// A read-back that keeps disagreeing fails the attempt. Read-backs that
    /// only ever error do not veto a write the backend acknowledged.
    async fn verify(&self, verify: &VerifyRead, call: &RemoteCall, expected: Option<&Value>) -> Result<(), String> {
        let limit = self.policy.attempt_timeout;
        let mut disagreed: Option<Option<Value>> = None;

        for poll in 0..self.policy.verify_polls.max(1) {
            sleep(self.policy.verify_delay).await;
            match timeout(limit, self.remote.read_back(verify, &call.input)).await {
                Ok(Ok(actual)) if verify.matches(expected, actual.as_ref()) => return Ok(()),
                Ok(Ok(actual)) => {
                    debug!(command = %verify.command, poll, "read-back disagrees");
                    disagreed = Some(actual);
                }
                Ok(Err(err)) => debug!(command = %verify.command, poll, error = %err, "read-back failed"),
                Err(_) => debug!(command = %verify.command, poll, "read-back timed out"),
            }
        }

        match disagreed {
            Some(actual) => Err(format!(
                "verification failed: backend still reports {}",
                actual.map_or_else(|| "nothing".to_string(), |v| v.to_string())
            )),
            None => {
                warn!(command = %verify.command, "read-back unavailable, trusting acknowledged write");
                Ok(())
            }
        }
    }
}
