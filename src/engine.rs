//! The assembled sync layer: one handle owning the local store, the mutation
//! queue, connectivity and the optimistic controller.
//!
//! ```ignore
//! let engine = Arc::new(
//!     SyncEngine::open(FileBackend::open(dir).await?, SchemaRegistry::social(), remote, SyncConfig::default()).await?,
//! );
//! let _watcher = engine.spawn_connectivity_watcher();
//! engine.pull("u1").await?;
//! engine.follows().follow("u1", "alice").await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::controller::{Mutation, MutationOutcome, OptimisticController};
use crate::error::SyncError;
use crate::features::{Channels, Follows, Locations, Preferences, PushSubscriptions, TenantRequests};
use crate::notify::Subscribers;
use crate::queue::{DrainReport, MutationQueue};
use crate::remote::RemoteApi;
use crate::schema::SchemaRegistry;
use crate::snapshot::{ImportReport, Snapshot, SnapshotImporter};
use crate::store::{LocalStore, StorageBackend};

pub struct SyncEngine<R> {
    store: LocalStore,
    queue: Arc<MutationQueue>,
    connectivity: ConnectivityMonitor,
    controller: Arc<OptimisticController<R>>,
    importer: SnapshotImporter,
    /// Set when a drain was requested while another one was running.
    recheck: AtomicBool,
}

impl<R: RemoteApi> SyncEngine<R> {
    /// Open the local store (upgrading it if needed) and restore the
    /// persisted mutation queue.
    ///
    /// Queued mutations are not delivered here, so listeners can subscribe
    /// before anything changes. A cold start resumes delivery through
    /// [`SyncEngine::spawn_connectivity_watcher`] (right away when already
    /// online), [`SyncEngine::drain`], or the next reconnect.
    pub async fn open<B>(backend: B, registry: SchemaRegistry, remote: R, config: SyncConfig) -> Result<Self, SyncError>
    where
        B: StorageBackend + 'static,
    {
        let backend: Arc<dyn StorageBackend> = Arc::new(backend);
        let store = LocalStore::with_storage_retry(Arc::clone(&backend), registry, config.storage.clone());
        store.open().await?;

        let queue = Arc::new(MutationQueue::new(backend, config.storage));
        let queued = queue.open().await?;

        let connectivity = ConnectivityMonitor::new(config.start_online);
        let controller = Arc::new(OptimisticController::new(
            store.clone(),
            Arc::clone(&queue),
            connectivity.clone(),
            remote,
            config.retry,
        ));
        let importer =
            SnapshotImporter::new(store.clone(), Arc::clone(&queue)).with_in_flight(controller.in_flight());

        info!(
            version = store.registry().version(),
            queued,
            online = connectivity.is_online(),
            "sync engine opened"
        );
        Ok(Self {
            store,
            queue,
            connectivity,
            controller,
            importer,
            recheck: AtomicBool::new(false),
        })
    }

    /// Close the local store; later operations fail with [`SyncError::Closed`].
    pub async fn close(&self) {
        self.store.close().await;
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn controller(&self) -> &Arc<OptimisticController<R>> {
        &self.controller
    }

    pub fn subscribers(&self) -> &Subscribers {
        self.store.subscribers()
    }

    /// Apply a mutation optimistically. A mutation deferred while online,
    /// behind a queued intent or a call still in the air, is delivered by a
    /// drain cycle right away; its rollback surfaces as
    /// [`SyncError::MutationFailed`].
    pub async fn mutate(&self, mutation: Mutation) -> Result<MutationOutcome, SyncError> {
        let target = mutation.target.clone();
        let outcome = self.controller.mutate(mutation).await?;
        if !matches!(outcome, MutationOutcome::Deferred { .. }) || !self.connectivity.is_online() {
            return Ok(outcome);
        }

        let report = self.drain_cycle().await?;
        if let Some(failed) = report.failed.into_iter().find(|f| f.target == target) {
            return Err(failed.into());
        }
        Ok(outcome)
    }

    /// Fetch the user's snapshot from the backend and import it.
    pub async fn pull(&self, user_id: &str) -> Result<ImportReport, SyncError> {
        let snapshot = self.controller.remote().fetch_snapshot(user_id).await?;
        self.import_snapshot(user_id, &snapshot).await
    }

    pub async fn import_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<ImportReport, SyncError> {
        self.importer.import_snapshot(user_id, snapshot).await
    }

    /// Deliver queued mutations now. Offline this does nothing.
    pub async fn drain(&self) -> Result<DrainReport, SyncError> {
        if !self.connectivity.is_online() {
            return Ok(DrainReport {
                remaining: self.queue.len().await?,
                interrupted: true,
                ..Default::default()
            });
        }
        self.drain_cycle().await
    }

    /// Record a connectivity change reported by the platform. Going online
    /// starts a drain cycle and returns its report.
    pub async fn set_online(&self, online: bool) -> Result<Option<DrainReport>, SyncError> {
        match self.connectivity.set_online(online) {
            Transition::WentOnline => self.drain_cycle().await.map(Some),
            Transition::WentOffline | Transition::Unchanged => Ok(None),
        }
    }

    /// Drain the queue. A request arriving while a drain runs is absorbed
    /// and re-checked once after that cycle ends.
    async fn drain_cycle(&self) -> Result<DrainReport, SyncError> {
        let mut report = self.queue.drain(self.controller.as_ref()).await?;
        if report.skipped {
            self.recheck.store(true, Ordering::SeqCst);
            return Ok(report);
        }
        if self.recheck.swap(false, Ordering::SeqCst) && self.connectivity.is_online() {
            debug!("re-checking queue after overlapping drain request");
            let again = self.queue.drain(self.controller.as_ref()).await?;
            if !again.skipped {
                report = merge(report, again);
            }
        }
        Ok(report)
    }
}

impl<R: RemoteApi + 'static> SyncEngine<R> {
    /// Drain whenever the platform reports the `offline -> online` edge via
    /// [`ConnectivityMonitor::set_online`]. When the engine is already online
    /// the task first delivers whatever a previous run left queued. The task
    /// ends when the engine is dropped.
    pub fn spawn_connectivity_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        let mut changes = self.connectivity.subscribe();
        tokio::spawn(async move {
            let mut online = *changes.borrow_and_update();
            if online && !watcher_drain(&engine).await {
                return;
            }
            while changes.changed().await.is_ok() {
                let now = *changes.borrow_and_update();
                let went_online = now && !online;
                online = now;
                if went_online && !watcher_drain(&engine).await {
                    break;
                }
            }
            debug!("connectivity watcher stopped");
        })
    }
}

/// Run one drain cycle for the watcher; false once the engine is gone.
async fn watcher_drain<R: RemoteApi>(engine: &Weak<SyncEngine<R>>) -> bool {
    let Some(engine) = engine.upgrade() else {
        return false;
    };
    match engine.drain_cycle().await {
        Ok(report) => {
            debug!(confirmed = report.confirmed, remaining = report.remaining, "watcher drain done");
            true
        }
        Err(SyncError::Closed) => false,
        Err(err) => {
            error!(error = %err, "watcher drain failed");
            true
        }
    }
}

impl<R: RemoteApi> SyncEngine<R> {
    pub fn follows(&self) -> Follows<'_, R> {
        Follows::new(self)
    }

    pub fn preferences(&self) -> Preferences<'_, R> {
        Preferences::new(self)
    }

    pub fn locations(&self) -> Locations<'_, R> {
        Locations::new(self)
    }

    pub fn channels(&self) -> Channels<'_, R> {
        Channels::new(self)
    }

    pub fn tenant_requests(&self) -> TenantRequests<'_, R> {
        TenantRequests::new(self)
    }

    pub fn push_subscriptions(&self) -> PushSubscriptions<'_, R> {
        PushSubscriptions::new(self)
    }
}

fn merge(mut first: DrainReport, second: DrainReport) -> DrainReport {
    first.confirmed += second.confirmed;
    first.failed.extend(second.failed);
    first.superseded += second.superseded;
    first.interrupted = second.interrupted;
    first.remaining = second.remaining;
    first
}
