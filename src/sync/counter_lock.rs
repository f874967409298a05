//! Counter-gated barrier.

use std::sync::{Condvar, Mutex};

/// An integer counter with a floor. `wait` blocks until the counter is at or
/// below `min_value`; `decrement` wakes all waiters whenever it brings the
/// counter to or below the floor. Serves both as a "concurrency <= N" gate
/// (executor dispatch) and as an "all N finished" barrier (segmented
/// downloads).
pub struct CounterLock {
    counter: Mutex<i64>,
    min_value: i64,
    cond: Condvar,
}

impl CounterLock {
    pub fn new(initial: i64, min_value: i64) -> Self {
        Self {
            counter: Mutex::new(initial),
            min_value,
            cond: Condvar::new(),
        }
    }

    pub fn increment(&self) {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
    }

    pub fn decrement(&self) {
        let mut counter = self.counter.lock().unwrap();
        *counter -= 1;
        if *counter <= self.min_value {
            self.cond.notify_all();
        }
    }

    pub fn value(&self) -> i64 {
        *self.counter.lock().unwrap()
    }

    /// Force-resets the counter to 0 and wakes all waiters.
    pub fn free(&self) {
        let mut counter = self.counter.lock().unwrap();
        *counter = 0;
        self.cond.notify_all();
    }

    /// Blocks until `counter <= min_value`, re-checking after every wake.
    /// Returns `true` once the condition holds.
    pub fn wait(&self) -> bool {
        let mut counter = self.counter.lock().unwrap();
        while *counter > self.min_value {
            counter = self.cond.wait(counter).unwrap();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn balanced_increments_do_not_block() {
        let lock = CounterLock::new(0, 0);
        for _ in 0..3 {
            lock.increment();
        }
        for _ in 0..3 {
            lock.decrement();
        }
        assert!(lock.wait());
        assert_eq!(lock.value(), 0);
    }

    #[test]
    fn wait_blocks_until_floor_reached() {
        let lock = Arc::new(CounterLock::new(2, 0));
        let l = Arc::clone(&lock);
        let h = thread::spawn(move || l.wait());
        thread::sleep(Duration::from_millis(20));
        lock.decrement();
        thread::sleep(Duration::from_millis(20));
        assert!(!h.is_finished(), "must still wait at counter 1");
        lock.decrement();
        assert!(h.join().unwrap());
    }

    #[test]
    fn free_wakes_waiters() {
        let lock = Arc::new(CounterLock::new(5, 0));
        let l = Arc::clone(&lock);
        let h = thread::spawn(move || l.wait());
        thread::sleep(Duration::from_millis(20));
        lock.free();
        assert!(h.join().unwrap());
        assert_eq!(lock.value(), 0);
    }

    #[test]
    fn acts_as_all_finished_barrier() {
        let lock = Arc::new(CounterLock::new(4, 0));
        let mut workers = Vec::new();
        for _ in 0..4 {
            let l = Arc::clone(&lock);
            workers.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                l.decrement();
            }));
        }
        assert!(lock.wait());
        for w in workers {
            w.join().unwrap();
        }
    }
}
