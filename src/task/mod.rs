//! Generic asynchronous task with cooperative pause/resume/stop.
//!
//! A `Task` runs one unit of work on its own thread. Pausing is cooperative:
//! the work function calls [`TaskContext::checkpoint`] at safe points, which
//! blocks while paused and fails fast once a stop was requested. The worker
//! always reaches a terminal state and always fires `END`, even when the work
//! fails; the captured failure is re-raised to whoever calls [`Task::join`].

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::events::Listeners;
use crate::sync::SyncObject;
use crate::tracker::DownloadState;

/// Observer for task lifecycle events. Fire-and-forget.
pub trait TaskListener: Send + Sync {
    fn on_begin(&self) {}
    fn on_pause(&self) {}
    fn on_resume(&self) {}
    fn on_end(&self) {}
    fn on_error(&self, _error: &anyhow::Error) {}
}

/// Error returned by `checkpoint` once a stop was requested.
#[derive(Debug)]
pub struct TaskStopped;

impl std::fmt::Display for TaskStopped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task stopped")
    }
}

impl std::error::Error for TaskStopped {}

type Work = Box<dyn FnOnce(&TaskContext) -> Result<()> + Send>;

struct TaskShared {
    state: Mutex<DownloadState>,
    state_changed: Condvar,
    stop_requested: AtomicBool,
    pause_gate: SyncObject,
    terminal_gate: SyncObject,
    failure: Mutex<Option<Arc<anyhow::Error>>>,
    listeners: Listeners<dyn TaskListener>,
}

impl TaskShared {
    fn set_state(&self, next: DownloadState) {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return;
        }
        *state = next;
        self.state_changed.notify_all();
    }
}

/// Handle to the work function for cooperative pause and stop checks.
pub struct TaskContext {
    shared: Arc<TaskShared>,
}

impl TaskContext {
    /// Safe point: blocks while the task is paused, returns `Err(TaskStopped)`
    /// once a stop was requested. Call once per unit of work (e.g. per buffer).
    pub fn checkpoint(&self) -> Result<(), TaskStopped> {
        if self.shared.stop_requested.load(Ordering::Relaxed) {
            return Err(TaskStopped);
        }
        if !self.shared.pause_gate.wait() {
            return Err(TaskStopped);
        }
        if self.shared.stop_requested.load(Ordering::Relaxed) {
            return Err(TaskStopped);
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Relaxed)
    }
}

/// One asynchronous job on its own thread, with a
/// `INITIAL -> STARTED -> RUNNING <-> PAUSED -> {DONE | STOPPED | ERROR}`
/// lifecycle. Once terminal, every further transition is an idempotent no-op.
pub struct Task {
    shared: Arc<TaskShared>,
    work: Mutex<Option<Work>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    pub fn new(work: impl FnOnce(&TaskContext) -> Result<()> + Send + 'static) -> Self {
        let shared = Arc::new(TaskShared {
            state: Mutex::new(DownloadState::Initial),
            state_changed: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            pause_gate: SyncObject::new(),
            terminal_gate: SyncObject::new(),
            failure: Mutex::new(None),
            listeners: Listeners::new(),
        });
        shared.pause_gate.unlock();
        Self {
            shared,
            work: Mutex::new(Some(Box::new(work))),
            handle: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.shared.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TaskListener>) {
        self.shared.listeners.remove(listener);
    }

    pub fn state(&self) -> DownloadState {
        *self.shared.state.lock().unwrap()
    }

    /// Spawns the worker and fires `BEGIN`. No-op if already started.
    pub fn start(&self) {
        let work = match self.work.lock().unwrap().take() {
            Some(w) => w,
            None => return,
        };
        self.shared.set_state(DownloadState::Started);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || {
            shared.set_state(DownloadState::Running);
            shared.listeners.for_each(|l| l.on_begin());

            let ctx = TaskContext {
                shared: Arc::clone(&shared),
            };
            let result = work(&ctx);

            // Terminal transition plus END always happen, even on failure.
            match result {
                Ok(()) => {
                    if shared.stop_requested.load(Ordering::Relaxed) {
                        shared.set_state(DownloadState::Stopped);
                    } else {
                        shared.set_state(DownloadState::Done);
                    }
                }
                Err(err) => {
                    if err.is::<TaskStopped>() {
                        shared.set_state(DownloadState::Stopped);
                    } else {
                        tracing::debug!(error = %err, "task failed");
                        let err = Arc::new(err);
                        *shared.failure.lock().unwrap() = Some(Arc::clone(&err));
                        shared.set_state(DownloadState::Error);
                        shared.listeners.for_each(|l| l.on_error(&err));
                    }
                }
            }
            shared.listeners.for_each(|l| l.on_end());
            shared.terminal_gate.unlock();
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Requests a cooperative pause. Valid only while running; the worker
    /// blocks at its next checkpoint.
    pub fn pause(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != DownloadState::Running {
                return;
            }
            *state = DownloadState::Paused;
        }
        self.shared.pause_gate.reset();
        self.shared.listeners.for_each(|l| l.on_pause());
    }

    /// Wakes a paused worker.
    pub fn resume(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != DownloadState::Paused {
                return;
            }
            *state = DownloadState::Running;
        }
        self.shared.pause_gate.unlock();
        self.shared.listeners.for_each(|l| l.on_resume());
    }

    /// Requests a stop; the worker unwinds at its next checkpoint. A task that
    /// never started becomes terminal immediately.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Relaxed);
        // A paused worker is parked on the gate; interrupt it so the
        // checkpoint returns TaskStopped.
        self.shared.pause_gate.interrupt();
        if self.work.lock().unwrap().take().is_some() {
            self.shared.set_state(DownloadState::Stopped);
            self.shared.terminal_gate.unlock();
        }
    }

    /// Blocks until the task is terminal, then re-raises any captured failure.
    pub fn join(&self) -> Result<()> {
        self.shared.terminal_gate.wait();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        match self.shared.failure.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow::anyhow!(Arc::clone(err))),
            None => Ok(()),
        }
    }
}
