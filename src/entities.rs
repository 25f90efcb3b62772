//! Entity types mirrored by the chat client, one per store in
//! [`SchemaRegistry::social`](crate::SchemaRegistry::social).
//!
//! Timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};

use crate::Record;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "users")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Presence means following.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "channel_follows")]
pub struct ChannelFollow {
    #[record(key)]
    pub user_id: String,
    #[record(key)]
    pub channel_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followed_at: Option<i64>,
}

impl ChannelFollow {
    pub fn new(user_id: impl Into<String>, channel_username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_username: channel_username.into(),
            followed_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "channel_last_viewed")]
pub struct ChannelLastViewed {
    #[record(key)]
    pub user_id: String,
    #[record(key)]
    pub channel_username: String,
    pub last_viewed_at: i64,
}

/// Written only by snapshot import.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "channel_activity")]
pub struct ChannelActivity {
    #[record(key)]
    pub channel_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    pub message_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// A user's request for access to a tenant channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "tenant_requests")]
pub struct TenantRequest {
    pub id: String,
    pub channel_username: String,
    pub user_id: String,
    pub status: TenantRequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Record)]
#[record(store = "user_locations")]
pub struct UserLocation {
    #[record(key)]
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

/// Web push registration, keyed by its delivery endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "push_subscriptions")]
pub struct PushSubscription {
    #[record(key)]
    pub endpoint: String,
    pub user_id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "notification_preferences")]
pub struct NotificationPreference {
    #[record(key)]
    pub user_id: String,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Record)]
#[record(store = "language_preferences")]
pub struct LanguagePreference {
    #[record(key)]
    pub user_id: String,
    /// BCP 47 tag, e.g. `pt-BR`.
    pub language: String,
}
