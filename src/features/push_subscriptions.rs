use crate::controller::{Mutation, MutationOutcome};
use crate::engine::SyncEngine;
use crate::entities::PushSubscription;
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::RemoteCall;
use crate::remote::RemoteApi;
use crate::store::encode;

pub const SUBSCRIBE_COMMAND: &str = "push.subscribe";

pub struct PushSubscriptions<'a, R> {
    engine: &'a SyncEngine<R>,
}

impl<'a, R: RemoteApi> PushSubscriptions<'a, R> {
    pub(crate) fn new(engine: &'a SyncEngine<R>) -> Self {
        Self { engine }
    }

    /// Register (or re-register) a push endpoint for the user.
    pub async fn register(&self, subscription: &PushSubscription) -> Result<MutationOutcome, SyncError> {
        let call = RemoteCall::new(SUBSCRIBE_COMMAND, encode(subscription)?);
        self.engine.mutate(Mutation::upsert(subscription, call)?).await
    }

    /// Flip `enabled` on a known endpoint. `None` if the endpoint is not
    /// registered locally.
    pub async fn set_enabled(&self, endpoint: &str, enabled: bool) -> Result<Option<MutationOutcome>, SyncError> {
        let current = self
            .engine
            .store()
            .entities::<PushSubscription>()
            .get(&Key::simple(endpoint))
            .await?;
        let Some(current) = current else {
            return Ok(None);
        };
        let subscription = PushSubscription {
            enabled,
            ..current.data
        };
        self.register(&subscription).await.map(Some)
    }

    pub async fn for_user(&self, user_id: &str) -> Result<Vec<PushSubscription>, SyncError> {
        let subscriptions = self
            .engine
            .store()
            .entities::<PushSubscription>()
            .query_by_index("by-user", &Key::simple(user_id))
            .await?;
        Ok(subscriptions.into_iter().map(|s| s.data).collect())
    }
}
