extern crate self as offline_mirror;

mod config;
mod connectivity;
mod controller;
mod engine;
mod entities;
mod error;
pub mod features;
mod key;
mod notify;
mod queue;
mod remote;
mod schema;
mod snapshot;
mod store;

pub use config::{RetryPolicy, StorageRetry, SyncConfig};
pub use connectivity::{ConnectivityMonitor, Transition};
pub use controller::{Mutation, MutationOutcome, MutationState, OptimisticController};
pub use engine::SyncEngine;
pub use entities::{
    Address, ChannelActivity, ChannelFollow, ChannelLastViewed, LanguagePreference,
    NotificationPreference, PushSubscription, TenantRequest, TenantRequestStatus, User,
    UserLocation,
};
pub use error::{MutationFailed, RemoteError, SchemaError, StorageError, SyncError};
pub use key::{Key, KeyShape};
pub use notify::{ChangeCause, ChangeEvent, SubscriptionId, Subscribers};
pub use queue::{
    Delivery, DrainReport, MutationQueue, MutationSink, MutationTarget, QueuedMutation,
    RemoteCall, VerifyRead,
};
pub use remote::RemoteApi;
pub use schema::{
    IndexSchema, Migration, MigrationContext, SchemaRegistry, StoreSchema, SOCIAL_SCHEMA_VERSION,
};
pub use snapshot::{ImportReport, RejectedRecord, Snapshot, SnapshotImporter, StoreFailure};
pub use store::{
    EntityStore, FileBackend, LocalStore, MemoryBackend, Record, StorageBackend, StoredRecord,
    Versioned,
};

// Derive macro shares the trait's name, as serde does.
pub use offline_mirror_macros::Record;

#[cfg(feature = "http")]
pub use remote::HttpRemote;

#[cfg(feature = "emitter")]
pub use notify::EmitterBridge;

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
