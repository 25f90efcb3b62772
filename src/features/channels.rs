use serde_json::json;

use crate::controller::{Mutation, MutationOutcome};
use crate::engine::SyncEngine;
use crate::entities::{ChannelActivity, ChannelLastViewed};
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::RemoteCall;
use crate::remote::RemoteApi;

use super::now_millis;

pub const MARK_VIEWED_COMMAND: &str = "channels.mark_viewed";

/// Last-viewed markers (written by the user) and channel activity
/// (pulled only).
pub struct Channels<'a, R> {
    engine: &'a SyncEngine<R>,
}

impl<'a, R: RemoteApi> Channels<'a, R> {
    pub(crate) fn new(engine: &'a SyncEngine<R>) -> Self {
        Self { engine }
    }

    pub async fn mark_viewed(&self, user_id: &str, channel_username: &str) -> Result<MutationOutcome, SyncError> {
        self.mark_viewed_at(user_id, channel_username, now_millis()).await
    }

    pub async fn mark_viewed_at(
        &self,
        user_id: &str,
        channel_username: &str,
        viewed_at: i64,
    ) -> Result<MutationOutcome, SyncError> {
        let marker = ChannelLastViewed {
            user_id: user_id.to_string(),
            channel_username: channel_username.to_string(),
            last_viewed_at: viewed_at,
        };
        let call = RemoteCall::new(
            MARK_VIEWED_COMMAND,
            json!({
                "user_id": user_id,
                "channel_username": channel_username,
                "last_viewed_at": viewed_at,
            }),
        );
        self.engine.mutate(Mutation::upsert(&marker, call)?).await
    }

    pub async fn last_viewed(&self, user_id: &str, channel_username: &str) -> Result<Option<i64>, SyncError> {
        let marker = self
            .engine
            .store()
            .entities::<ChannelLastViewed>()
            .get(&Key::from((user_id, channel_username)))
            .await?;
        Ok(marker.map(|m| m.data.last_viewed_at))
    }

    pub async fn activity(&self, channel_username: &str) -> Result<Option<ChannelActivity>, SyncError> {
        let activity = self
            .engine
            .store()
            .entities::<ChannelActivity>()
            .get(&Key::simple(channel_username))
            .await?;
        Ok(activity.map(|a| a.data))
    }

    pub async fn all_activity(&self) -> Result<Vec<ChannelActivity>, SyncError> {
        let all = self.engine.store().entities::<ChannelActivity>().get_all().await?;
        Ok(all.into_iter().map(|a| a.data).collect())
    }
}
