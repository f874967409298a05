//! Internal queue task state and the public per-item handle.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::sync::StateMutex;

use super::position::PositionState;
use super::ExecutorInner;

/// Cooperative cancellation token handed to every work closure. A long-running
/// unit should poll it at safe points (e.g. once per buffer) and unwind
/// promptly when set.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub(crate) type WorkFn<T> = Box<dyn FnMut(&CancelToken) -> Result<T> + Send>;

/// Narrow task state, independent of (but analogous to) the outer lifecycle.
/// Several flags can be true at once: a task can be both called and paused.
#[derive(Default)]
struct TaskFlags {
    called: bool,
    paused: bool,
    done: bool,
}

/// One submitted work item. Created on submit, dropped once the queue and all
/// handles let go of it.
pub(crate) struct InternalQueueTask<T> {
    flags: Mutex<TaskFlags>,
    cancelled: Arc<AtomicBool>,
    work: Mutex<Option<WorkFn<T>>>,
    result: Mutex<Option<Result<T>>>,
    /// Unlocked once the item's run completed or it was cancelled.
    done_gate: StateMutex,
    position: Mutex<Option<Arc<PositionState>>>,
}

impl<T> InternalQueueTask<T> {
    pub(crate) fn new(work: WorkFn<T>, position: Option<Arc<PositionState>>) -> Self {
        Self {
            flags: Mutex::new(TaskFlags::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            work: Mutex::new(Some(work)),
            result: Mutex::new(None),
            done_gate: StateMutex::new(),
            position: Mutex::new(position),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Marks cancelled; returns true on the first call. Callers that know the
    /// item will never run must also call [`Self::release_waiters`].
    pub(crate) fn mark_cancelled(&self) -> bool {
        !self.cancelled.swap(true, Ordering::Relaxed)
    }

    /// Unblocks `get` for an item that will never produce a result.
    pub(crate) fn release_waiters(&self) {
        self.done_gate.unlock();
    }

    pub(crate) fn is_done(&self) -> bool {
        self.flags.lock().unwrap().done
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.flags.lock().unwrap().paused
    }

    pub(crate) fn was_called(&self) -> bool {
        self.flags.lock().unwrap().called
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.flags.lock().unwrap().paused = paused;
    }

    pub(crate) fn position(&self) -> Option<Arc<PositionState>> {
        self.position.lock().unwrap().clone()
    }

    pub(crate) fn set_position(&self, position: Arc<PositionState>) {
        *self.position.lock().unwrap() = Some(position);
    }

    /// Executes one run of the work function on the calling (pool) thread.
    pub(crate) fn run(&self) {
        let mut work = match self.work.lock().unwrap().take() {
            Some(w) => w,
            None => return,
        };
        self.flags.lock().unwrap().called = true;
        let token = CancelToken {
            flag: Arc::clone(&self.cancelled),
        };
        let result = work(&token);
        // Keep the work function around: resuming a completed item re-runs it.
        *self.work.lock().unwrap() = Some(work);
        *self.result.lock().unwrap() = Some(result);
        self.flags.lock().unwrap().done = true;
        self.done_gate.unlock();
    }

    /// Rewinds the per-run state so the item can be submitted again.
    pub(crate) fn reset_for_rerun(&self) {
        let mut flags = self.flags.lock().unwrap();
        flags.called = false;
        flags.done = false;
        flags.paused = false;
        drop(flags);
        *self.result.lock().unwrap() = None;
        self.done_gate.reset();
    }
}

/// Public contract for one submitted item: cancel, run-granularity
/// pause/resume, and a blocking `get` for the run's result.
pub struct QueueTaskHandle<T: Send + 'static> {
    pub(crate) task: Arc<InternalQueueTask<T>>,
    pub(crate) inner: Arc<ExecutorInner<T>>,
}

impl<T: Send + 'static> QueueTaskHandle<T> {
    /// Cancels the item. Idempotent. A queued item is removed from
    /// consideration immediately; a running item is asked to interrupt via its
    /// `CancelToken` and its slot is reclaimed when the run ends.
    pub fn cancel(&self) {
        self.inner.cancel_task(&self.task);
    }

    /// Pauses at run granularity: an item that has not begun executing is
    /// deferred by the dispatcher; one that already began finishes its current
    /// run naturally.
    pub fn pause(&self) {
        self.inner.pause_task(&self.task);
    }

    /// Undoes a pause. A deferred item re-enters the queue ahead; an item that
    /// already completed a run is re-submitted as a brand-new submission.
    pub fn resume(&self) {
        self.inner.resume_task(&self.task);
    }

    /// Blocks until the item's run completes, then returns its result or
    /// propagates its failure. The value is moved out by the first caller.
    pub fn get(&self) -> Result<T> {
        self.task.done_gate.wait()?;
        if let Some(result) = self.task.result.lock().unwrap().take() {
            return result;
        }
        if self.task.is_cancelled() {
            anyhow::bail!("task cancelled");
        }
        anyhow::bail!("task result already taken");
    }

    pub fn is_paused(&self) -> bool {
        self.task.is_paused()
    }

    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Live 0-based distance from the front of the queue. `None` unless the
    /// executor is position-aware.
    pub fn queue_position(&self) -> Option<u64> {
        self.task.position().map(|p| p.queue_position())
    }
}
