//! Live progress tracking for one logical transfer.
//!
//! One tracker may be shared by several concurrent partitions; `update` and
//! `update_total` are safe to call from any partition thread. Consumers (UI,
//! logs) read plain snapshots and never block a transfer loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Sentinel stored while the total size is still unknown.
const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Shared lifecycle vocabulary for tasks and transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Initial,
    Started,
    Running,
    Paused,
    Done,
    Stopped,
    Error,
}

impl DownloadState {
    /// True once a terminal state is reached; no further transition is
    /// accepted after that.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Done | DownloadState::Stopped | DownloadState::Error
        )
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadState::Initial => "initial",
            DownloadState::Started => "started",
            DownloadState::Running => "running",
            DownloadState::Paused => "paused",
            DownloadState::Done => "done",
            DownloadState::Stopped => "stopped",
            DownloadState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Mutable progress aggregate for one logical transfer. Counters are additive
/// across partitions.
pub struct DownloadTracker {
    current: AtomicU64,
    total: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    state: Mutex<DownloadState>,
}

impl Default for DownloadTracker {
    fn default() -> Self {
        Self {
            current: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN_TOTAL),
            started_at: Mutex::new(None),
            state: Mutex::new(DownloadState::Initial),
        }
    }
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` transferred bytes and returns the new current count.
    pub fn update(&self, delta: u64) -> u64 {
        self.current.fetch_add(delta, Ordering::Relaxed) + delta
    }

    /// Removes `delta` transferred bytes, clamped at zero. Used when a
    /// non-resumable run restarts from scratch and its bytes are discarded.
    pub fn discard(&self, delta: u64) {
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(delta);
            match self.current.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Records the authoritative total size. First writer wins; later calls
    /// (from whichever partition discovers the size next) are no-ops.
    pub fn update_total(&self, total: u64) {
        let _ = self.total.compare_exchange(
            UNKNOWN_TOTAL,
            total,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Marks the start instant for speed/ETA computation. Idempotent.
    pub fn mark_started(&self) {
        let mut started = self.started_at.lock().unwrap();
        if started.is_none() {
            *started = Some(Instant::now());
        }
    }

    pub fn set_state(&self, state: DownloadState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn state(&self) -> DownloadState {
        *self.state.lock().unwrap()
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Total size in bytes, `None` while unknown.
    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => None,
            n => Some(n),
        }
    }

    /// Transfer rate in bytes per second (0 before any elapsed time).
    pub fn speed(&self) -> u64 {
        self.snapshot().bytes_per_sec() as u64
    }

    /// Estimated seconds remaining, `None` while indeterminate.
    pub fn seconds_left(&self) -> Option<u64> {
        self.snapshot().eta_secs().map(|s| s.ceil() as u64)
    }

    /// Fraction complete in `[0, 1]`, `None` while the total is unknown.
    pub fn progress(&self) -> Option<f64> {
        self.snapshot().fraction()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let elapsed_secs = self
            .started_at
            .lock()
            .unwrap()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        TrackerSnapshot {
            bytes_done: self.current(),
            total_bytes: self.total(),
            elapsed_secs,
            state: self.state(),
        }
    }
}

/// Read-only snapshot of a tracker, handed to `UPDATE` listeners.
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    pub bytes_done: u64,
    pub total_bytes: Option<u64>,
    pub elapsed_secs: f64,
    pub state: DownloadState,
}

impl TrackerSnapshot {
    /// Transfer rate in bytes per second (0 if no time has elapsed).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (`None` if the total or rate is unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let total = self.total_bytes?;
        let remaining = total.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in `[0, 1]`, `None` while indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.bytes_done as f64 / total as f64).min(1.0))
    }
}
