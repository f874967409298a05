//! Low-level wait/notify gates shared by the task executor and the downloader.
//!
//! All three primitives block in a condvar wait (never a spin) and re-check
//! their condition after every wake, so spurious wakeups and unlock-before-wait
//! races are harmless.

mod counter_lock;
mod state_mutex;
mod sync_object;

pub use counter_lock::CounterLock;
pub use state_mutex::StateMutex;
pub use sync_object::SyncObject;
