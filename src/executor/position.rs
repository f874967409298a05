//! Live queue-position bookkeeping.
//!
//! Every submission gets an immutable, monotonic `position` plus a mutable
//! `lower_fence` that starts at the number of items already fully processed.
//! The live queue position is `position - lower_fence`. Every queue event is
//! broadcast to all still-pending items; each item decides locally whether the
//! event happened ahead of it and nudges its own fence by exactly one. That
//! keeps maintenance O(1) per event per item with no full-queue rescans.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::TransferError;
use crate::executor::{CancelToken, QueueTaskExecutor, QueueTaskHandle};

/// What happened to some item in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueEventKind {
    /// A new item entered the queue (carries the highest position, so no
    /// pending item is affected).
    Submitted,
    /// A queued item was cancelled before it ever ran.
    Cancelled,
    /// An item finished its run (successfully or not).
    Finished,
    /// A queued item was paused and left the live queue.
    Deferred,
    /// A deferred item re-entered the queue ahead, at its original position.
    Resumed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueEvent {
    pub kind: QueueEventKind,
    pub position: u64,
}

/// Per-item position state: immutable submission sequence number plus the
/// mutable fence. Owned by exactly one internal queue task at a time.
pub(crate) struct PositionState {
    position: u64,
    lower_fence: AtomicI64,
}

impl PositionState {
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// 0-based live distance from the front of the queue.
    pub(crate) fn queue_position(&self) -> u64 {
        let pos = self.position as i64 - self.lower_fence.load(Ordering::Relaxed);
        pos.max(0) as u64
    }

    fn observe(&self, event: &QueueEvent) {
        if event.position > self.position {
            return;
        }
        match event.kind {
            QueueEventKind::Cancelled
            | QueueEventKind::Finished
            | QueueEventKind::Deferred => {
                // An item ahead left the queue: this one moves up.
                self.lower_fence.fetch_add(1, Ordering::Relaxed);
            }
            QueueEventKind::Resumed => {
                // An item ahead came back: this one moves down.
                self.lower_fence.fetch_sub(1, Ordering::Relaxed);
            }
            QueueEventKind::Submitted => {}
        }
    }
}

/// Owned sequence generator and broadcast hub for one executor instance.
#[derive(Default)]
pub(crate) struct PositionLedger {
    seq: AtomicU64,
    processed: AtomicU64,
    pending: Mutex<Vec<Weak<PositionState>>>,
}

impl PositionLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Captures a fresh position/fence snapshot for a new (or re-submitted)
    /// item and registers it for event broadcasts.
    pub(crate) fn register(&self) -> Arc<PositionState> {
        let state = Arc::new(PositionState {
            position: self.seq.fetch_add(1, Ordering::Relaxed),
            lower_fence: AtomicI64::new(self.processed.load(Ordering::Relaxed) as i64),
        });
        self.pending.lock().unwrap().push(Arc::downgrade(&state));
        state
    }

    pub(crate) fn broadcast(&self, event: QueueEvent) {
        if matches!(
            event.kind,
            QueueEventKind::Cancelled | QueueEventKind::Finished
        ) {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|weak| match weak.upgrade() {
            // The event's own item no longer needs broadcasts once terminal.
            Some(state) if state.position == event.position => {
                if matches!(
                    event.kind,
                    QueueEventKind::Cancelled | QueueEventKind::Finished
                ) {
                    false
                } else {
                    true
                }
            }
            Some(state) => {
                state.observe(&event);
                true
            }
            None => false,
        });
    }
}

/// Decorates [`QueueTaskExecutor`] with O(1) live queue-position tracking for
/// every pending item. `queue_position` on the returned handles reports how
/// many unprocessed items sit ahead, adjusted live as siblings are submitted,
/// cancelled, paused, resumed, or finished.
pub struct PositionAwareQueueTaskExecutor<T: Send + 'static> {
    executor: QueueTaskExecutor<T>,
}

impl<T: Send + 'static> PositionAwareQueueTaskExecutor<T> {
    /// Fails fast if `max_task_count` is 0.
    pub fn new(max_task_count: usize) -> Result<Self, TransferError> {
        let ledger = Arc::new(PositionLedger::new());
        Ok(Self {
            executor: QueueTaskExecutor::with_ledger(max_task_count, Some(ledger))?,
        })
    }

    pub fn submit(
        &self,
        work: impl FnMut(&CancelToken) -> anyhow::Result<T> + Send + 'static,
    ) -> QueueTaskHandle<T> {
        self.executor.submit(work)
    }

    /// See [`QueueTaskExecutor::stop`].
    pub fn stop(&self, cancel_running: bool) {
        self.executor.stop(cancel_running);
    }
}
