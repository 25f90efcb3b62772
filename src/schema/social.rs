use crate::key::KeyShape;

use super::{SchemaRegistry, StoreSchema};

pub const SOCIAL_SCHEMA_VERSION: u32 = 1;

impl SchemaRegistry {
    /// Stores mirrored by the chat client.
    pub fn social() -> Self {
        SchemaRegistry::new(SOCIAL_SCHEMA_VERSION)
            .store(StoreSchema::new("users", KeyShape::simple("id")).required(["id", "username"]))
            .store(
                StoreSchema::new(
                    "channel_follows",
                    KeyShape::composite(["user_id", "channel_username"]),
                )
                .index("by-user", ["user_id"])
                .owned_by("user_id"),
            )
            .store(
                StoreSchema::new(
                    "channel_last_viewed",
                    KeyShape::composite(["user_id", "channel_username"]),
                )
                .index("by-user", ["user_id"])
                .required(["last_viewed_at"])
                .owned_by("user_id"),
            )
            .store(
                StoreSchema::new("channel_activity", KeyShape::simple("channel_username"))
                    .required(["message_count"])
                    .sync_only(),
            )
            .store(
                StoreSchema::new("tenant_requests", KeyShape::simple("id"))
                    .index("by-channel", ["channel_username"])
                    .index("by-user", ["user_id"])
                    .index("by-status", ["status"])
                    .required(["channel_username", "user_id", "status"]),
            )
            .store(
                StoreSchema::new("user_locations", KeyShape::simple("user_id"))
                    .required(["latitude", "longitude"])
                    .owned_by("user_id"),
            )
            .store(
                StoreSchema::new("push_subscriptions", KeyShape::simple("endpoint"))
                    .index("by-user", ["user_id"])
                    .required(["user_id", "enabled"])
                    .owned_by("user_id"),
            )
            .store(
                StoreSchema::new("notification_preferences", KeyShape::simple("user_id"))
                    .required(["enabled"])
                    .owned_by("user_id"),
            )
            .store(
                StoreSchema::new("language_preferences", KeyShape::simple("user_id"))
                    .required(["language"])
                    .owned_by("user_id"),
            )
    }
}
