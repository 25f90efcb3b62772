//! Per-feature helpers over [`SyncEngine`](crate::SyncEngine).
//!
//! Each helper only knows its store, the backend command that makes a write
//! durable and, for notification preferences, how to verify it. Optimistic
//! application, queueing, retry and rollback are the controller's.

mod channels;
mod follows;
mod locations;
mod preferences;
mod push_subscriptions;
mod tenant_requests;

use std::time::{SystemTime, UNIX_EPOCH};

pub use channels::{Channels, MARK_VIEWED_COMMAND};
pub use follows::{Follows, FOLLOW_COMMAND, UNFOLLOW_COMMAND};
pub use locations::{Locations, UPSERT_LOCATION_COMMAND};
pub use preferences::{
    Preferences, GET_NOTIFICATIONS_COMMAND, SET_LANGUAGE_COMMAND, SET_NOTIFICATIONS_COMMAND,
};
pub use push_subscriptions::{PushSubscriptions, SUBSCRIBE_COMMAND};
pub use tenant_requests::{TenantRequests, CREATE_REQUEST_COMMAND};

/// Current time in Unix epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
