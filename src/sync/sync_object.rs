//! One-shot unlock gate with external interruption.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
struct Gate {
    unlocked: bool,
    interrupted: bool,
}

/// Minimal wait/notify gate: `wait` blocks until another thread calls
/// `unlock`. `interrupt` wakes all waiters and makes `wait` return `false`
/// instead; it never panics or propagates an error.
#[derive(Default)]
pub struct SyncObject {
    gate: Mutex<Gate>,
    cond: Condvar,
}

impl SyncObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes every current and future waiter.
    pub fn unlock(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.unlocked = true;
        self.cond.notify_all();
    }

    /// Wakes all waiters with a `false` result without opening the gate.
    pub fn interrupt(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.interrupted = true;
        self.cond.notify_all();
    }

    /// Closes the gate again and clears any pending interruption.
    pub fn reset(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.unlocked = false;
        gate.interrupted = false;
    }

    /// Blocks until `unlock` is called. Returns `false` only if the wait was
    /// interrupted.
    pub fn wait(&self) -> bool {
        let mut gate = self.gate.lock().unwrap();
        loop {
            if gate.interrupted {
                return false;
            }
            if gate.unlocked {
                return true;
            }
            gate = self.cond.wait(gate).unwrap();
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.gate.lock().unwrap().unlocked
    }
}
