//! Bounded-concurrency task scheduling.
//!
//! [`QueueTaskExecutor`] accepts work items into a FIFO queue and runs at most
//! `max_task_count` of them concurrently on a fixed worker pool. A dedicated
//! dispatch thread waits for a free slot and a queued item, gated by a
//! [`CounterLock`](crate::sync::CounterLock). Each submission returns a
//! [`QueueTaskHandle`] with cancel / pause / resume / get.
//! [`PositionAwareQueueTaskExecutor`] adds live queue-position tracking.

mod pool;
mod position;
mod task;

pub use position::PositionAwareQueueTaskExecutor;
pub use task::{CancelToken, QueueTaskHandle};

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::TransferError;
use crate::sync::{CounterLock, StateMutex};

use pool::WorkerPool;
use position::{PositionLedger, QueueEvent, QueueEventKind};
use task::InternalQueueTask;

pub(crate) struct ExecutorInner<T> {
    /// FIFO of items eligible to run.
    queue: Mutex<VecDeque<Arc<InternalQueueTask<T>>>>,
    /// Items paused before their first run; the dispatcher never sees them.
    deferred: Mutex<Vec<Arc<InternalQueueTask<T>>>>,
    /// Recently dispatched items, pruned from the front as they finish.
    running: Mutex<VecDeque<Arc<InternalQueueTask<T>>>>,
    /// Signaled whenever the queue gains an item or the executor stops.
    queued_gate: StateMutex,
    /// Concurrency gate: counts running items, floor `max_task_count - 1`.
    slot_gate: CounterLock,
    pool: WorkerPool,
    stopping: AtomicBool,
    ledger: Option<Arc<PositionLedger>>,
}

impl<T: Send + 'static> ExecutorInner<T> {
    fn emit(&self, kind: QueueEventKind, task: &InternalQueueTask<T>) {
        if let (Some(ledger), Some(position)) = (&self.ledger, task.position()) {
            ledger.broadcast(QueueEvent {
                kind,
                position: position.position(),
            });
        }
    }

    fn remove_from(
        list: &Mutex<VecDeque<Arc<InternalQueueTask<T>>>>,
        task: &Arc<InternalQueueTask<T>>,
    ) -> bool {
        let mut list = list.lock().unwrap();
        if let Some(idx) = list.iter().position(|t| Arc::ptr_eq(t, task)) {
            list.remove(idx);
            true
        } else {
            false
        }
    }

    pub(crate) fn cancel_task(&self, task: &Arc<InternalQueueTask<T>>) {
        if !task.mark_cancelled() {
            return;
        }
        let was_queued = Self::remove_from(&self.queue, task) || {
            let mut deferred = self.deferred.lock().unwrap();
            match deferred.iter().position(|t| Arc::ptr_eq(t, task)) {
                Some(idx) => {
                    deferred.remove(idx);
                    true
                }
                None => false,
            }
        };
        if was_queued {
            // Never ran; it leaves the queue for good.
            task.release_waiters();
            self.emit(QueueEventKind::Cancelled, task);
            tracing::debug!("cancelled queued task");
        }
        // If it is running (or in the dispatcher's hands), the CancelToken
        // interrupts the unit and finish_task reclaims the slot.
    }

    pub(crate) fn pause_task(&self, task: &Arc<InternalQueueTask<T>>) {
        if task.is_cancelled() || task.is_paused() {
            return;
        }
        task.set_paused(true);
        if Self::remove_from(&self.queue, task) {
            self.deferred.lock().unwrap().push(Arc::clone(task));
            self.emit(QueueEventKind::Deferred, task);
        }
        // Already dispatched: the current run completes naturally; the flag
        // only matters for what happens after.
    }

    pub(crate) fn resume_task(self: &Arc<Self>, task: &Arc<InternalQueueTask<T>>) {
        if task.is_cancelled() || !task.is_paused() {
            return;
        }
        task.set_paused(false);

        let was_deferred = {
            let mut deferred = self.deferred.lock().unwrap();
            match deferred.iter().position(|t| Arc::ptr_eq(t, task)) {
                Some(idx) => {
                    deferred.remove(idx);
                    true
                }
                None => false,
            }
        };
        if was_deferred {
            // Back into the live queue at its original position.
            self.queue.lock().unwrap().push_front(Arc::clone(task));
            self.emit(QueueEventKind::Resumed, task);
            self.queued_gate.unlock();
        } else if task.is_done() {
            // Completed one run: a resume is a brand-new submission with a
            // fresh position/fence snapshot.
            task.reset_for_rerun();
            if let Some(ledger) = &self.ledger {
                task.set_position(ledger.register());
            }
            self.queue.lock().unwrap().push_back(Arc::clone(task));
            self.emit(QueueEventKind::Submitted, task);
            self.queued_gate.unlock();
        }
    }

    /// Runs on a pool worker: executes (or skips) one item, then reclaims the
    /// concurrency slot.
    fn run_task(&self, task: &Arc<InternalQueueTask<T>>) {
        if task.is_cancelled() && !task.was_called() {
            // Cancel raced with dispatch; the cancel path could not remove it.
            task.release_waiters();
            self.emit(QueueEventKind::Cancelled, task);
        } else {
            task.run();
            self.emit(QueueEventKind::Finished, task);
        }
        self.slot_gate.decrement();
    }

    fn dispatch_loop(self: &Arc<Self>) {
        loop {
            let _ = self.queued_gate.wait_and_reset();
            if self.stopping.load(Ordering::Relaxed) {
                return;
            }
            loop {
                let task = match self.queue.lock().unwrap().pop_front() {
                    Some(t) => t,
                    None => break,
                };
                // One free slot and one queued item: run it.
                self.slot_gate.wait();
                if self.stopping.load(Ordering::Relaxed) {
                    self.finish_queued(&task);
                    return;
                }
                self.slot_gate.increment();
                {
                    let mut running = self.running.lock().unwrap();
                    // Amortized cleanup from the front only, not a full scan.
                    while running
                        .front()
                        .map_or(false, |t| t.is_done() || t.is_cancelled())
                    {
                        running.pop_front();
                    }
                    running.push_back(Arc::clone(&task));
                }
                let inner = Arc::clone(self);
                let item = Arc::clone(&task);
                if !self.pool.execute(Box::new(move || inner.run_task(&item))) {
                    // Pool already gone; treat like a drained item.
                    self.slot_gate.decrement();
                    self.finish_queued(&task);
                    return;
                }
            }
        }
    }

    /// Cancels an item that will never be dispatched (executor stopping).
    fn finish_queued(&self, task: &Arc<InternalQueueTask<T>>) {
        if task.mark_cancelled() {
            task.release_waiters();
            self.emit(QueueEventKind::Cancelled, task);
        } else {
            task.release_waiters();
        }
    }
}

/// Executor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Running,
    Stopped,
}

/// Bounded-concurrency scheduler over one logical resource.
pub struct QueueTaskExecutor<T: Send + 'static> {
    inner: Arc<ExecutorInner<T>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<ExecutorState>,
}

impl<T: Send + 'static> QueueTaskExecutor<T> {
    /// Creates an executor running at most `max_task_count` items at once.
    /// Fails fast if the capacity is 0, before any thread is spawned.
    pub fn new(max_task_count: usize) -> Result<Self, TransferError> {
        Self::with_ledger(max_task_count, None)
    }

    pub(crate) fn with_ledger(
        max_task_count: usize,
        ledger: Option<Arc<PositionLedger>>,
    ) -> Result<Self, TransferError> {
        if max_task_count == 0 {
            return Err(TransferError::Config(
                "max_task_count must be greater than 0".to_string(),
            ));
        }
        let inner = Arc::new(ExecutorInner {
            queue: Mutex::new(VecDeque::new()),
            deferred: Mutex::new(Vec::new()),
            running: Mutex::new(VecDeque::new()),
            queued_gate: StateMutex::new(),
            slot_gate: CounterLock::new(0, max_task_count as i64 - 1),
            pool: WorkerPool::new(max_task_count),
            stopping: AtomicBool::new(false),
            ledger,
        });
        let dispatcher = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || inner.dispatch_loop())
        };
        Ok(Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
            state: Mutex::new(ExecutorState::Running),
        })
    }

    /// Enqueues a work item. The closure receives a [`CancelToken`] it should
    /// poll at safe points; it may run again if the item is re-submitted via
    /// pause/resume after completion.
    pub fn submit(
        &self,
        work: impl FnMut(&CancelToken) -> Result<T> + Send + 'static,
    ) -> QueueTaskHandle<T> {
        let position = self.inner.ledger.as_ref().map(|l| l.register());
        let task = Arc::new(InternalQueueTask::new(Box::new(work), position));
        if self.inner.stopping.load(Ordering::Relaxed) {
            task.mark_cancelled();
            task.release_waiters();
        } else {
            self.inner.queue.lock().unwrap().push_back(Arc::clone(&task));
            self.inner.emit(QueueEventKind::Submitted, &task);
            self.inner.queued_gate.unlock();
        }
        QueueTaskHandle {
            task,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.lock().unwrap()
    }

    /// Stops the executor: drains (cancels) the submitted queue, releases the
    /// concurrency gate, and blocks until the worker pool has fully drained.
    /// With `cancel_running` the still-running items are interrupted through
    /// their cancel tokens; without it, in-flight work finishes naturally.
    /// Idempotent.
    pub fn stop(&self, cancel_running: bool) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ExecutorState::Stopped {
                return;
            }
            *state = ExecutorState::Stopped;
        }
        self.inner.stopping.store(true, Ordering::Relaxed);

        let drained: Vec<_> = {
            let mut queue = self.inner.queue.lock().unwrap();
            let mut deferred = self.inner.deferred.lock().unwrap();
            queue.drain(..).chain(deferred.drain(..)).collect()
        };
        for task in drained {
            self.inner.finish_queued(&task);
        }
        if cancel_running {
            for task in self.inner.running.lock().unwrap().iter() {
                task.mark_cancelled();
            }
        }

        // Wake the dispatcher out of either gate, then wait for everything.
        self.inner.queued_gate.unlock();
        self.inner.slot_gate.free();
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.pool.shutdown();
        tracing::debug!("executor stopped");
    }
}

impl<T: Send + 'static> Drop for QueueTaskExecutor<T> {
    fn drop(&mut self) {
        self.stop(false);
    }
}
