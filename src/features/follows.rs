use serde_json::json;

use crate::controller::{Mutation, MutationOutcome};
use crate::engine::SyncEngine;
use crate::entities::ChannelFollow;
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::RemoteCall;
use crate::remote::RemoteApi;

use super::now_millis;

pub const FOLLOW_COMMAND: &str = "follows.follow";
pub const UNFOLLOW_COMMAND: &str = "follows.unfollow";

/// Following channels. A [`ChannelFollow`] record exists while the user
/// follows the channel.
pub struct Follows<'a, R> {
    engine: &'a SyncEngine<R>,
}

impl<'a, R: RemoteApi> Follows<'a, R> {
    pub(crate) fn new(engine: &'a SyncEngine<R>) -> Self {
        Self { engine }
    }

    pub async fn follow(&self, user_id: &str, channel_username: &str) -> Result<MutationOutcome, SyncError> {
        let follow = ChannelFollow {
            followed_at: Some(now_millis()),
            ..ChannelFollow::new(user_id, channel_username)
        };
        let call = RemoteCall::new(FOLLOW_COMMAND, input(user_id, channel_username));
        self.engine.mutate(Mutation::upsert(&follow, call)?).await
    }

    pub async fn unfollow(&self, user_id: &str, channel_username: &str) -> Result<MutationOutcome, SyncError> {
        let call = RemoteCall::new(UNFOLLOW_COMMAND, input(user_id, channel_username));
        self.engine
            .mutate(Mutation::remove::<ChannelFollow>((user_id, channel_username), call))
            .await
    }

    pub async fn is_following(&self, user_id: &str, channel_username: &str) -> Result<bool, SyncError> {
        let follow = self
            .engine
            .store()
            .entities::<ChannelFollow>()
            .get(&Key::from((user_id, channel_username)))
            .await?;
        Ok(follow.is_some())
    }

    /// Channel usernames the user follows, sorted.
    pub async fn followed_channels(&self, user_id: &str) -> Result<Vec<String>, SyncError> {
        let follows = self
            .engine
            .store()
            .entities::<ChannelFollow>()
            .query_by_index("by-user", &Key::simple(user_id))
            .await?;
        Ok(follows.into_iter().map(|f| f.data.channel_username).collect())
    }
}

fn input(user_id: &str, channel_username: &str) -> serde_json::Value {
    json!({ "user_id": user_id, "channel_username": channel_username })
}
