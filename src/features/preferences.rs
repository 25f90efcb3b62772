use serde_json::json;

use crate::controller::{Mutation, MutationOutcome};
use crate::engine::SyncEngine;
use crate::entities::{LanguagePreference, NotificationPreference};
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::{RemoteCall, VerifyRead};
use crate::remote::RemoteApi;

pub const SET_NOTIFICATIONS_COMMAND: &str = "preferences.notifications.set";
pub const GET_NOTIFICATIONS_COMMAND: &str = "preferences.notifications.get";
pub const SET_LANGUAGE_COMMAND: &str = "preferences.language.set";

/// Notification and language preferences of a user.
pub struct Preferences<'a, R> {
    engine: &'a SyncEngine<R>,
}

impl<'a, R: RemoteApi> Preferences<'a, R> {
    pub(crate) fn new(engine: &'a SyncEngine<R>) -> Self {
        Self { engine }
    }

    /// Toggle notifications. The backend applies this through push
    /// subscription fan-out, so the write is only confirmed once a read-back
    /// reports the new `enabled` value.
    pub async fn set_notifications(&self, user_id: &str, enabled: bool) -> Result<MutationOutcome, SyncError> {
        let preference = NotificationPreference {
            user_id: user_id.to_string(),
            enabled,
        };
        let call = RemoteCall::new(
            SET_NOTIFICATIONS_COMMAND,
            json!({ "user_id": user_id, "enabled": enabled }),
        )
        .with_verify(VerifyRead::new(GET_NOTIFICATIONS_COMMAND).fields(["enabled"]));
        self.engine.mutate(Mutation::upsert(&preference, call)?).await
    }

    /// `None` until the preference was pulled or set.
    pub async fn notifications_enabled(&self, user_id: &str) -> Result<Option<bool>, SyncError> {
        let preference = self
            .engine
            .store()
            .entities::<NotificationPreference>()
            .get(&Key::simple(user_id))
            .await?;
        Ok(preference.map(|p| p.data.enabled))
    }

    pub async fn set_language(&self, user_id: &str, language: &str) -> Result<MutationOutcome, SyncError> {
        let preference = LanguagePreference {
            user_id: user_id.to_string(),
            language: language.to_string(),
        };
        let call = RemoteCall::new(
            SET_LANGUAGE_COMMAND,
            json!({ "user_id": user_id, "language": language }),
        );
        self.engine.mutate(Mutation::upsert(&preference, call)?).await
    }

    pub async fn language(&self, user_id: &str) -> Result<Option<String>, SyncError> {
        let preference = self
            .engine
            .store()
            .entities::<LanguagePreference>()
            .get(&Key::simple(user_id))
            .await?;
        Ok(preference.map(|p| p.data.language))
    }
}
