//! Reusable unlocked-flag gate that can also hand a failure to its consumer.

use anyhow::Result;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
struct GateState {
    unlocked: bool,
    failure: Option<Arc<anyhow::Error>>,
}

/// A boolean "unlocked" gate. Once `unlock` is called, all current and future
/// `wait` calls succeed until `reset`. `wait_and_reset` atomically clears the
/// flag before returning, so the gate can be reused as a one-shot signal in a
/// loop. A producer can hand a failure to the consumer with `fail`; the next
/// waiter receives it as an `Err`.
#[derive(Default)]
pub struct StateMutex {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl StateMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that starts in the unlocked state.
    pub fn new_unlocked() -> Self {
        let gate = Self::new();
        gate.state.lock().unwrap().unlocked = true;
        gate
    }

    /// Opens the gate and wakes every waiter.
    pub fn unlock(&self) {
        let mut state = self.state.lock().unwrap();
        state.unlocked = true;
        self.cond.notify_all();
    }

    /// Opens the gate and wakes at most one waiter.
    pub fn unlock_one(&self) {
        let mut state = self.state.lock().unwrap();
        state.unlocked = true;
        self.cond.notify_one();
    }

    /// Stores `error` and opens the gate; the next `wait`/`wait_and_reset`
    /// returns it as `Err`.
    pub fn fail(&self, error: anyhow::Error) {
        let mut state = self.state.lock().unwrap();
        state.failure = Some(Arc::new(error));
        state.unlocked = true;
        self.cond.notify_all();
    }

    /// Closes the gate and clears any stored failure.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.unlocked = false;
        state.failure = None;
    }

    /// Blocks until the gate is unlocked, leaving it unlocked.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while !state.unlocked {
            state = self.cond.wait(state).unwrap();
        }
        match &state.failure {
            Some(err) => Err(anyhow::anyhow!(Arc::clone(err))),
            None => Ok(()),
        }
    }

    /// Blocks until the gate is unlocked, then atomically closes it again and
    /// takes any stored failure.
    pub fn wait_and_reset(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        while !state.unlocked {
            state = self.cond.wait(state).unwrap();
        }
        state.unlocked = false;
        match state.failure.take() {
            Some(err) => Err(anyhow::anyhow!(err)),
            None => Ok(()),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.lock().unwrap().unlocked
    }
}
