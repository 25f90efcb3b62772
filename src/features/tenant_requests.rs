use crate::controller::{Mutation, MutationOutcome};
use crate::engine::SyncEngine;
use crate::entities::{TenantRequest, TenantRequestStatus};
use crate::error::SyncError;
use crate::key::Key;
use crate::queue::RemoteCall;
use crate::remote::RemoteApi;
use crate::store::encode;

pub const CREATE_REQUEST_COMMAND: &str = "tenant_requests.create";

pub struct TenantRequests<'a, R> {
    engine: &'a SyncEngine<R>,
}

impl<'a, R: RemoteApi> TenantRequests<'a, R> {
    pub(crate) fn new(engine: &'a SyncEngine<R>) -> Self {
        Self { engine }
    }

    /// Ask for access to a tenant channel. The caller picks the request id
    /// so a retried create stays idempotent.
    pub async fn request_access(&self, request: &TenantRequest) -> Result<MutationOutcome, SyncError> {
        let call = RemoteCall::new(CREATE_REQUEST_COMMAND, encode(request)?);
        self.engine.mutate(Mutation::upsert(request, call)?).await
    }

    pub async fn requests_for_channel(&self, channel_username: &str) -> Result<Vec<TenantRequest>, SyncError> {
        self.by_index("by-channel", channel_username).await
    }

    pub async fn requests_by_user(&self, user_id: &str) -> Result<Vec<TenantRequest>, SyncError> {
        self.by_index("by-user", user_id).await
    }

    pub async fn with_status(&self, status: TenantRequestStatus) -> Result<Vec<TenantRequest>, SyncError> {
        let status = match status {
            TenantRequestStatus::Pending => "pending",
            TenantRequestStatus::Approved => "approved",
            TenantRequestStatus::Rejected => "rejected",
        };
        self.by_index("by-status", status).await
    }

    async fn by_index(&self, index: &str, value: &str) -> Result<Vec<TenantRequest>, SyncError> {
        let requests = self
            .engine
            .store()
            .entities::<TenantRequest>()
            .query_by_index(index, &Key::simple(value))
            .await?;
        Ok(requests.into_iter().map(|r| r.data).collect())
    }
}
