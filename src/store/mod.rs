//! Persistent entity stores.
//!
//! A [`LocalStore`] owns one table per declared store, keeps them in memory
//! and writes every committed change through to a [`StorageBackend`].
//!
//! ```ignore
//! let store = LocalStore::new(MemoryBackend::new(), SchemaRegistry::social());
//! store.open().await?;
//! store.entities::<ChannelFollow>().put(&follow).await?;
//! let mine = store.entities::<ChannelFollow>().query_by_index("by-user", &Key::simple("u1")).await?;
//! ```

mod backend;
mod entity;
mod file;
mod local;
mod table;

pub use backend::{MemoryBackend, StorageBackend};
pub use entity::{EntityStore, Record, Versioned};
pub use file::FileBackend;
pub use local::LocalStore;
pub use table::StoredRecord;

pub(crate) use backend::retrying;
pub(crate) use entity::encode;
pub(crate) use local::WriteKind;
pub(crate) use table::Table;

pub(crate) const SCHEMA_BLOB: &str = "schema.meta";

pub(crate) fn store_blob(store: &str) -> String {
    format!("store.{}", store)
}
