use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// What a connectivity update changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
    Unchanged,
}

/// Online/offline flag fed by the platform's connectivity signal.
///
/// Clone-friendly; clones share the flag. Interested tasks can
/// [`subscribe`](Self::subscribe) to changes.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Record the platform's current connectivity.
    pub fn set_online(&self, online: bool) -> Transition {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        match (changed, online) {
            (false, _) => Transition::Unchanged,
            (true, true) => {
                info!("connectivity restored");
                Transition::WentOnline
            }
            (true, false) => {
                info!("connectivity lost");
                Transition::WentOffline
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
