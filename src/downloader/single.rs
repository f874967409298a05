//! Single-partition resumable downloader.
//!
//! One `FileDownloader` moves one byte region of a remote resource into one
//! region of the destination file. `start` blocks until the transfer reaches a
//! terminal state; `pause`, `resume` and `stop` act from other threads between
//! buffer writes. Progress survives across runs, so calling `start` again
//! after a stop or a network error continues from the first missing byte.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::TransferError;
use crate::events::{DownloadListener, Listeners};
use crate::net::{Request, ResponseInfo, Transport, TransferSink};
use crate::range::ByteRange;
use crate::storage::StorageWriter;
use crate::sync::StateMutex;
use crate::tracker::{DownloadState, DownloadTracker};

use super::{DownloadConfig, ResponseFilter};

/// Durable per-downloader progress. Ranges always describe the *remaining*
/// work; they advance after every run so a later `start` picks up exactly
/// where the previous one left off.
#[derive(Default)]
struct Progress {
    initialized: bool,
    request_range: Option<ByteRange>,
    output_range: Option<ByteRange>,
    /// Total bytes this downloader is responsible for, once known.
    expected: Option<u64>,
    /// Bytes written across all runs.
    written: u64,
}

pub struct FileDownloader {
    transport: Arc<dyn Transport>,
    tracker: Arc<DownloadTracker>,
    listeners: Listeners<dyn DownloadListener>,
    state: Mutex<DownloadState>,
    stop_requested: AtomicBool,
    /// Unlocked while running; `pause` resets it so the write loop blocks
    /// between buffers, `resume` and `stop` unlock it again.
    pause_gate: StateMutex,
    progress: Mutex<Progress>,
}

/// Why the sink told the transport to abort mid-body.
enum AbortReason {
    Stop,
    Storage(std::io::Error),
    Overflow { expected: u64, received: u64 },
}

struct RunSink<'a> {
    downloader: &'a FileDownloader,
    storage: &'a StorageWriter,
    /// Absolute file offset of the next byte.
    offset: u64,
    /// Bytes written by this run.
    written: u64,
    /// Cap for this run (the remaining range length), `None` for an
    /// unknown-size whole-resource transfer.
    limit: Option<u64>,
    /// Start of the requested range, when one was sent.
    range_start: Option<u64>,
    filter: Option<ResponseFilter>,
    /// Resource size learned from the response when none was known.
    discovered: Option<u64>,
    abort: Option<AbortReason>,
}

impl TransferSink for RunSink<'_> {
    fn headers(&mut self, info: &ResponseInfo) -> bool {
        if let Some(filter) = &self.filter {
            if !filter(info) {
                return false;
            }
        }
        // A 200 against a nonzero-offset range means the server is replaying
        // the body from byte 0; writing it at our offset would corrupt the
        // region.
        if matches!(self.range_start, Some(start) if start > 0) && info.status != 206 {
            return false;
        }
        if self.limit.is_none() {
            if let Some(total) = info.resource_length() {
                self.discovered = Some(total);
                self.downloader.tracker.update_total(total);
            }
        }
        true
    }

    fn data(&mut self, chunk: &[u8]) -> bool {
        let dl = self.downloader;
        if dl.stop_requested.load(Ordering::SeqCst) {
            self.abort = Some(AbortReason::Stop);
            return false;
        }
        // Blocks here while paused; stop unlocks the gate, so recheck.
        if dl.pause_gate.wait().is_err() || dl.stop_requested.load(Ordering::SeqCst) {
            self.abort = Some(AbortReason::Stop);
            return false;
        }
        if let Some(limit) = self.limit {
            if self.written + chunk.len() as u64 > limit {
                // The server sent more than the requested range. Writing past
                // the region would corrupt a neighbouring partition.
                self.abort = Some(AbortReason::Overflow {
                    expected: limit,
                    received: self.written + chunk.len() as u64,
                });
                return false;
            }
        }
        if let Err(e) = self.storage.write_at(self.offset, chunk) {
            self.abort = Some(AbortReason::Storage(e));
            return false;
        }
        self.offset += chunk.len() as u64;
        self.written += chunk.len() as u64;
        dl.tracker.update(chunk.len() as u64);
        let snapshot = dl.tracker.snapshot();
        dl.listeners.for_each(|l| l.on_update(&snapshot));
        true
    }
}

enum RunOutcome {
    Complete,
    Stopped,
    Failed(TransferError),
}

impl FileDownloader {
    pub fn new(transport: Arc<dyn Transport>, tracker: Arc<DownloadTracker>) -> Self {
        Self {
            transport,
            tracker,
            listeners: Listeners::new(),
            state: Mutex::new(DownloadState::Initial),
            stop_requested: AtomicBool::new(false),
            pause_gate: StateMutex::new_unlocked(),
            progress: Mutex::new(Progress::default()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DownloadListener>) {
        self.listeners.remove(listener);
    }

    pub fn state(&self) -> DownloadState {
        *self.state.lock().unwrap()
    }

    /// Bytes written across all runs so far.
    pub fn bytes_written(&self) -> u64 {
        self.progress.lock().unwrap().written
    }

    pub fn tracker(&self) -> &Arc<DownloadTracker> {
        &self.tracker
    }

    fn set_state(&self, state: DownloadState) {
        *self.state.lock().unwrap() = state;
    }

    /// Runs (or resumes) the transfer, blocking until it is done, stopped or
    /// failed. Returns the bytes written by this run. A run ending in `stop`
    /// returns `Ok`; call `start` again to continue it later.
    pub fn start(
        &self,
        request: &Request,
        storage: &StorageWriter,
        config: &DownloadConfig,
    ) -> Result<u64, TransferError> {
        {
            let mut p = self.progress.lock().unwrap();
            if !p.initialized {
                p.request_range = config.range_request();
                p.output_range = config.range_output();
                p.expected = config.range_request().map(|r| r.len()).or(config.total_bytes());
                // A whole-resource transfer with a known total is addressed as
                // one full range so it can resume.
                if p.request_range.is_none() {
                    if let Some(total) = config.total_bytes() {
                        p.request_range = Some(ByteRange::new(0, total));
                        p.output_range = Some(ByteRange::new(0, total));
                    }
                }
                p.initialized = true;
            }
            if let Some(expected) = p.expected {
                if p.written >= expected {
                    drop(p);
                    self.set_state(DownloadState::Done);
                    return Ok(0);
                }
            }
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.pause_gate.unlock();
        self.set_state(DownloadState::Started);
        self.tracker.mark_started();
        self.set_state(DownloadState::Running);
        self.listeners.for_each(|l| l.on_begin());

        let (run_range, out_offset) = {
            let mut p = self.progress.lock().unwrap();
            match p.request_range {
                Some(r) => {
                    let offset = p.output_range.map(|o| o.start).unwrap_or(r.start);
                    (Some(r), offset)
                }
                None => {
                    // Unknown size and no range: the remainder cannot be
                    // addressed, so a resumed run restarts from scratch and
                    // the abandoned run's bytes leave the tracker.
                    if p.written > 0 {
                        self.tracker.discard(p.written);
                        p.written = 0;
                    }
                    (None, 0)
                }
            }
        };

        let run_request = match run_range {
            Some(r) => request.clone().with_range(r),
            None => request.clone().without_range(),
        };
        tracing::debug!(
            url = %run_request.url,
            range = ?run_request.range,
            "starting transfer run"
        );

        let mut sink = RunSink {
            downloader: self,
            storage,
            offset: out_offset,
            written: 0,
            limit: run_range.map(|r| r.len()),
            range_start: run_range.map(|r| r.start),
            filter: config.response_filter().cloned(),
            discovered: None,
            abort: None,
        };
        let result = self.transport.fetch(&run_request, &mut sink);
        let run_written = sink.written;
        let discovered = sink.discovered;
        let abort = sink.abort.take();

        {
            let mut p = self.progress.lock().unwrap();
            p.written += run_written;
            p.request_range = p.request_range.map(|r| r.advanced(run_written));
            p.output_range = p.output_range.map(|r| r.advanced(run_written));
            if p.expected.is_none() {
                if let Some(total) = discovered {
                    // Size learned mid-run; address the remainder so a later
                    // run can resume instead of restarting.
                    p.expected = Some(total);
                    p.request_range = Some(ByteRange::new(p.written, total));
                    p.output_range = Some(ByteRange::new(p.written, total));
                }
            }
        }

        let outcome = match result {
            Ok(()) => {
                let mut p = self.progress.lock().unwrap();
                match p.expected {
                    Some(expected) if p.written < expected => {
                        RunOutcome::Failed(TransferError::PartialTransfer {
                            expected,
                            received: p.written,
                        })
                    }
                    Some(_) => RunOutcome::Complete,
                    None => {
                        // Unknown size: a clean end of body defines the total.
                        p.expected = Some(p.written);
                        self.tracker.update_total(p.written);
                        RunOutcome::Complete
                    }
                }
            }
            Err(TransferError::Stopped) => match abort {
                Some(AbortReason::Storage(e)) => RunOutcome::Failed(TransferError::Storage(e)),
                Some(AbortReason::Overflow { expected, received }) => {
                    RunOutcome::Failed(TransferError::PartialTransfer { expected, received })
                }
                Some(AbortReason::Stop) | None => RunOutcome::Stopped,
            },
            Err(e) => RunOutcome::Failed(e),
        };

        match outcome {
            RunOutcome::Complete => {
                tracing::debug!(bytes = run_written, "transfer run complete");
                self.set_state(DownloadState::Done);
                self.listeners.for_each(|l| l.on_end());
                Ok(run_written)
            }
            RunOutcome::Stopped => {
                tracing::debug!(bytes = run_written, "transfer run stopped");
                self.set_state(DownloadState::Stopped);
                self.listeners.for_each(|l| l.on_end());
                Ok(run_written)
            }
            RunOutcome::Failed(e) => {
                tracing::warn!(error = %e, "transfer run failed");
                self.set_state(DownloadState::Error);
                self.listeners.for_each(|l| l.on_error(&e));
                Err(e)
            }
        }
    }

    /// Blocks the write loop after the buffer currently in flight. No-op
    /// unless the transfer is running.
    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == DownloadState::Running {
            *state = DownloadState::Paused;
            drop(state);
            self.pause_gate.reset();
            self.listeners.for_each(|l| l.on_pause());
        }
    }

    /// Releases a paused write loop. No-op unless paused.
    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == DownloadState::Paused {
            *state = DownloadState::Running;
            drop(state);
            self.pause_gate.unlock();
            self.listeners.for_each(|l| l.on_resume());
        }
    }

    /// Requests a cooperative stop. A running (or paused) transfer exits at
    /// the next buffer boundary and `start` returns `Ok` with the bytes
    /// written so far; calling `start` again resumes from there.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // Wake a paused loop so it can observe the stop.
        self.pause_gate.unlock();
        let mut state = self.state.lock().unwrap();
        if *state == DownloadState::Initial {
            *state = DownloadState::Stopped;
        }
    }
}
