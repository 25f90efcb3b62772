//! Durable queue of local mutations awaiting backend confirmation.
//!
//! Mutations made while offline (or while an earlier mutation of the same
//! entity is still queued) land here and are delivered in submission order
//! by [`MutationQueue::drain`] once connectivity returns.

mod queue;
mod record;

pub use queue::{Delivery, DrainReport, MutationQueue, MutationSink};
pub use record::{MutationTarget, QueuedMutation, RemoteCall, VerifyRead};
