//! Runtime configuration: retry/backoff for remote calls, retry for local
//! storage writes, and the initial connectivity assumption.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```ignore
//! let config = SyncConfig::from_json(r#"{ "retry": { "max_retries": 5 } }"#)?;
//! assert_eq!(config.retry.max_retries, 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded retry with exponential backoff for remote calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each following retry.
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Per-attempt timeout; a timeout counts as a failed attempt.
    #[serde(with = "duration_ms")]
    pub attempt_timeout: Duration,
    /// Read-back polls made after a write that asks for verification.
    pub verify_polls: u32,
    /// Fixed delay between read-back polls.
    #[serde(with = "duration_ms")]
    pub verify_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
            verify_polls: 3,
            verify_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_verify_polls(mut self, polls: u32, delay: Duration) -> Self {
        self.verify_polls = polls;
        self.verify_delay = delay;
        self
    }

    /// Total attempts a mutation may make, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before attempt number `attempt` (0-based). The first
    /// attempt is immediate.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Retry for writes to the local storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageRetry {
    pub attempts: u32,
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl Default for StorageRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    pub storage: StorageRetry,
    /// Connectivity assumed at startup, before the platform reports.
    pub start_online: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            storage: StorageRetry::default(),
            start_online: true,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_storage_retry(mut self, storage: StorageRetry) -> Self {
        self.storage = storage;
        self
    }

    pub fn starting_offline(mut self) -> Self {
        self.start_online = false;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
