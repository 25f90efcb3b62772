use crate::controller::{Mutation, MutationOutcome};
use crate::engine::SyncEngine;
use crate::entities::UserLocation;
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::RemoteCall;
use crate::remote::RemoteApi;
use crate::store::encode;

pub const UPSERT_LOCATION_COMMAND: &str = "locations.upsert";

pub struct Locations<'a, R> {
    engine: &'a SyncEngine<R>,
}

impl<'a, R: RemoteApi> Locations<'a, R> {
    pub(crate) fn new(engine: &'a SyncEngine<R>) -> Self {
        Self { engine }
    }

    /// Create or update the user's saved location.
    pub async fn save(&self, location: &UserLocation) -> Result<MutationOutcome, SyncError> {
        let call = RemoteCall::new(UPSERT_LOCATION_COMMAND, encode(location)?);
        self.engine.mutate(Mutation::upsert(location, call)?).await
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserLocation>, SyncError> {
        let location = self
            .engine
            .store()
            .entities::<UserLocation>()
            .get(&Key::simple(user_id))
            .await?;
        Ok(location.map(|l| l.data))
    }
}
