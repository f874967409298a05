//! Listener registries with safe concurrent add/remove/fire.
//!
//! Listeners are attached from an orchestrator thread while events fire from
//! partition threads, so the registry snapshots its list before iterating and
//! never holds its lock across a callback.

use std::sync::{Arc, Mutex};

use crate::error::TransferError;
use crate::tracker::TrackerSnapshot;

/// Observer for download lifecycle and progress events. All methods default to
/// no-ops so listeners implement only what they care about. Fire-and-forget:
/// return values are never observed by the firer.
pub trait DownloadListener: Send + Sync {
    fn on_begin(&self) {}
    fn on_update(&self, _snapshot: &TrackerSnapshot) {}
    fn on_end(&self) {}
    fn on_error(&self, _error: &TransferError) {}
    fn on_pause(&self) {}
    fn on_resume(&self) {}
}

/// Copy-on-iterate listener registry.
pub struct Listeners<L: ?Sized> {
    inner: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> Listeners<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<L>) {
        self.inner.lock().unwrap().push(listener);
    }

    /// Removes a previously added listener, matched by pointer identity.
    pub fn remove(&self, listener: &Arc<L>) {
        self.inner
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Snapshot of the current listeners; fire events against the returned
    /// list so callbacks run outside the registry lock.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.inner.lock().unwrap().clone()
    }

    pub fn for_each(&self, mut f: impl FnMut(&L)) {
        for listener in self.snapshot() {
            f(&listener);
        }
    }
}
