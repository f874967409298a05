//! Segmented download orchestrator.
//!
//! Splits one logical transfer into N contiguous partitions, runs a
//! [`FileDownloader`] per partition against one shared destination file and
//! one shared tracker, and aggregates the partitions' lifecycle events into a
//! single observable stream: one `BEGIN`, merged `UPDATE`s, at most one
//! `ERROR`, and one `END` only once every partition is done or stopped.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crate::error::TransferError;
use crate::events::{DownloadListener, Listeners};
use crate::net::{Request, Transport};
use crate::range::{partition, ByteRange};
use crate::storage::StorageWriter;
use crate::sync::CounterLock;
use crate::tracker::{DownloadState, DownloadTracker, TrackerSnapshot};

use super::{DownloadConfig, FileDownloader};

/// One partition's downloader plus the config it was planned with. The config
/// only matters on the partition's first run; later runs resume from the
/// downloader's own progress.
#[derive(Clone)]
struct PartitionJob {
    downloader: Arc<FileDownloader>,
    config: DownloadConfig,
}

/// Merges per-partition events into the orchestrator's listener stream.
/// Holds the partitions weakly; the partitions hold this listener strongly.
struct Aggregator {
    listeners: Arc<Listeners<dyn DownloadListener>>,
    partitions: Vec<Weak<FileDownloader>>,
    begin_fired: AtomicBool,
    error_fired: AtomicBool,
}

impl DownloadListener for Aggregator {
    fn on_begin(&self) {
        if !self.begin_fired.swap(true, Ordering::SeqCst) {
            self.listeners.for_each(|l| l.on_begin());
        }
    }

    fn on_update(&self, snapshot: &TrackerSnapshot) {
        self.listeners.for_each(|l| l.on_update(snapshot));
    }

    // Partition ends are not the transfer's end; the orchestrator emits the
    // single END once every partition has settled.
    fn on_end(&self) {}

    fn on_error(&self, error: &TransferError) {
        for weak in &self.partitions {
            if let Some(partition) = weak.upgrade() {
                partition.stop();
            }
        }
        if !self.error_fired.swap(true, Ordering::SeqCst) {
            self.listeners.for_each(|l| l.on_error(error));
        }
    }

    // Pause/resume fan out from the orchestrator, which fires its own events.
    fn on_pause(&self) {}
    fn on_resume(&self) {}
}

pub struct AcceleratedFileDownloader {
    transport: Arc<dyn Transport>,
    num_threads: usize,
    keep_partial_on_error: bool,
    tracker: Arc<DownloadTracker>,
    listeners: Arc<Listeners<dyn DownloadListener>>,
    partitions: Mutex<Vec<PartitionJob>>,
}

impl AcceleratedFileDownloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        num_threads: usize,
    ) -> Result<Self, TransferError> {
        if num_threads == 0 {
            return Err(TransferError::Config(
                "partition count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            transport,
            num_threads,
            keep_partial_on_error: true,
            tracker: Arc::new(DownloadTracker::new()),
            listeners: Arc::new(Listeners::new()),
            partitions: Mutex::new(Vec::new()),
        })
    }

    /// Builds an orchestrator from the engine configuration.
    pub fn from_config(
        transport: Arc<dyn Transport>,
        config: &crate::config::EngineConfig,
    ) -> Result<Self, TransferError> {
        Ok(Self::new(transport, config.num_threads)?
            .keep_partial_on_error(config.keep_partial_on_error))
    }

    /// Whether bytes already on disk survive a failed transfer. Defaults to
    /// true, which is what makes a later `start` resumable.
    pub fn keep_partial_on_error(mut self, keep: bool) -> Self {
        self.keep_partial_on_error = keep;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn DownloadListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DownloadListener>) {
        self.listeners.remove(listener);
    }

    pub fn tracker(&self) -> &Arc<DownloadTracker> {
        &self.tracker
    }

    /// Current state of each partition, in byte order.
    pub fn partition_states(&self) -> Vec<DownloadState> {
        self.partitions
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.downloader.state())
            .collect()
    }

    /// Plans the partitions on the first run. Size resolution order: an
    /// explicit request range, the configured total, then a size probe.
    /// Unknown size forces a single unranged partition; a server that does
    /// not honour ranges gets a single full-range partition, which stays
    /// correct even when it answers with a 200 full body.
    fn plan(
        &self,
        request: &Request,
        config: &DownloadConfig,
    ) -> Result<(Vec<PartitionJob>, Option<ByteRange>), TransferError> {
        let (base, split) = match config.range_request() {
            Some(req) => {
                let out = config
                    .range_output()
                    .unwrap_or(ByteRange::new(0, req.len()));
                (Some((req, out)), self.num_threads)
            }
            None => {
                let (total, ranges_ok) = match config.total_bytes() {
                    Some(t) => (Some(t), true),
                    None => {
                        let probe = self.transport.probe(request)?;
                        (probe.size, probe.accept_ranges)
                    }
                };
                let split = if ranges_ok { self.num_threads } else { 1 };
                if total.is_some() && !ranges_ok {
                    tracing::info!(url = %request.url, "server does not accept ranges, using a single partition");
                }
                (
                    total.map(|t| (ByteRange::new(0, t), ByteRange::new(0, t))),
                    split,
                )
            }
        };

        let filter = config.response_filter().cloned();
        let jobs = match base {
            Some((base_req, base_out)) => {
                self.tracker.update_total(base_req.len());
                partition(base_req.len(), split)
                    .into_iter()
                    .map(|p| {
                        let cfg = DownloadConfig::whole()
                            .with_ranges(
                                ByteRange::new(base_req.start + p.start, base_req.start + p.end),
                                ByteRange::new(base_out.start + p.start, base_out.start + p.end),
                            )?
                            .with_filter_arc(filter.clone());
                        Ok(PartitionJob {
                            downloader: Arc::new(FileDownloader::new(
                                Arc::clone(&self.transport),
                                Arc::clone(&self.tracker),
                            )),
                            config: cfg,
                        })
                    })
                    .collect::<Result<Vec<_>, TransferError>>()?
            }
            None => {
                tracing::info!(url = %request.url, "size unknown, using a single partition");
                vec![PartitionJob {
                    downloader: Arc::new(FileDownloader::new(
                        Arc::clone(&self.transport),
                        Arc::clone(&self.tracker),
                    )),
                    config: DownloadConfig::whole().with_filter_arc(filter),
                }]
            }
        };

        let aggregator = Arc::new(Aggregator {
            listeners: Arc::clone(&self.listeners),
            partitions: jobs.iter().map(|j| Arc::downgrade(&j.downloader)).collect(),
            begin_fired: AtomicBool::new(false),
            error_fired: AtomicBool::new(false),
        });
        for job in &jobs {
            job.downloader.add_listener(aggregator.clone());
        }

        Ok((jobs, base.map(|(_, out)| out)))
    }

    /// Downloads `request` into `output`, blocking until every partition is
    /// done, stopped, or one of them fails. Returns the bytes written by this
    /// run. After a stop or an error (with partial bytes kept), calling
    /// `start` again resumes the remaining byte ranges.
    pub fn start(
        &self,
        request: &Request,
        output: &Path,
        config: &DownloadConfig,
    ) -> Result<u64, TransferError> {
        let storage = StorageWriter::open(output).map_err(TransferError::Storage)?;

        // Planning may probe the network, so it runs outside the partitions
        // lock; stop/pause/partition_states stay responsive during the first
        // start. The lock is only taken briefly to install the plan.
        let planned = if self.partitions.lock().unwrap().is_empty() {
            let (jobs, out_range) = self.plan(request, config)?;
            if let Some(out) = out_range {
                storage.preallocate(out.end).map_err(TransferError::Storage)?;
            }
            tracing::info!(
                url = %request.url,
                partitions = jobs.len(),
                total = ?self.tracker.total(),
                path = %output.display(),
                "starting segmented download"
            );
            Some(jobs)
        } else {
            None
        };

        let jobs = {
            let mut guard = self.partitions.lock().unwrap();
            if let Some(jobs) = planned {
                // A concurrent first start may have planned in the meantime;
                // whichever install lands first wins.
                if guard.is_empty() {
                    *guard = jobs;
                }
            }
            guard.clone()
        };

        self.tracker.mark_started();
        self.tracker.set_state(DownloadState::Running);

        let results = if jobs.len() == 1 {
            // Single partition runs inline; same semantics, no pool.
            let job = &jobs[0];
            vec![job.downloader.start(request, &storage, &job.config)]
        } else {
            let barrier = Arc::new(CounterLock::new(jobs.len() as i64, 0));
            let (tx, rx) = mpsc::channel();
            let mut handles = Vec::with_capacity(jobs.len());
            for (index, job) in jobs.iter().cloned().enumerate() {
                let request = request.clone();
                let storage = storage.clone();
                let barrier = Arc::clone(&barrier);
                let tx = tx.clone();
                handles.push(thread::spawn(move || {
                    let result = job.downloader.start(&request, &storage, &job.config);
                    let _ = tx.send((index, result));
                    barrier.decrement();
                }));
            }
            drop(tx);
            barrier.wait();
            for handle in handles {
                let _ = handle.join();
            }
            let mut collected: Vec<_> = rx.iter().collect();
            collected.sort_by_key(|(index, _)| *index);
            collected.into_iter().map(|(_, r)| r).collect()
        };

        let mut written = 0u64;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(n) => written += n,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(error) = first_error {
            if !self.keep_partial_on_error {
                if let Err(e) = storage.clear() {
                    tracing::warn!(error = %e, "failed to discard partial bytes");
                }
            }
            self.tracker.set_state(DownloadState::Error);
            return Err(error);
        }

        storage.sync().map_err(TransferError::Storage)?;
        let all_done = jobs
            .iter()
            .all(|j| j.downloader.state() == DownloadState::Done);
        self.tracker.set_state(if all_done {
            DownloadState::Done
        } else {
            DownloadState::Stopped
        });
        self.listeners.for_each(|l| l.on_end());
        tracing::info!(bytes = written, state = %self.tracker.state(), "segmented download finished");
        Ok(written)
    }

    /// Pauses every running partition after its buffer in flight.
    pub fn pause(&self) {
        if self.tracker.state() != DownloadState::Running {
            return;
        }
        for job in self.partitions.lock().unwrap().iter() {
            job.downloader.pause();
        }
        self.tracker.set_state(DownloadState::Paused);
        self.listeners.for_each(|l| l.on_pause());
    }

    /// Releases every paused partition.
    pub fn resume(&self) {
        if self.tracker.state() != DownloadState::Paused {
            return;
        }
        for job in self.partitions.lock().unwrap().iter() {
            job.downloader.resume();
        }
        self.tracker.set_state(DownloadState::Running);
        self.listeners.for_each(|l| l.on_resume());
    }

    /// Requests a cooperative stop of every partition; the blocked `start`
    /// call returns once they settle.
    pub fn stop(&self) {
        for job in self.partitions.lock().unwrap().iter() {
            job.downloader.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testutil::MemoryTransport;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    #[derive(Default)]
    struct Recorder {
        begin: AtomicUsize,
        update: AtomicUsize,
        end: AtomicUsize,
        error: AtomicUsize,
    }

    impl DownloadListener for Recorder {
        fn on_begin(&self) {
            self.begin.fetch_add(1, Ordering::Relaxed);
        }
        fn on_update(&self, _s: &TrackerSnapshot) {
            self.update.fetch_add(1, Ordering::Relaxed);
        }
        fn on_end(&self) {
            self.end.fetch_add(1, Ordering::Relaxed);
        }
        fn on_error(&self, _e: &TransferError) {
            self.error.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn segmented_download_matches_source() {
        let data = body(10_000);
        let mut transport = MemoryTransport::new(data.clone());
        transport.chunk = 512;
        let dl = AcceleratedFileDownloader::new(Arc::new(transport), 4).unwrap();
        let recorder = Arc::new(Recorder::default());
        dl.add_listener(recorder.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.bin");
        let written = dl
            .start(&Request::new("mem://seg"), &path, &DownloadConfig::whole())
            .unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(dl.tracker().state(), DownloadState::Done);
        assert_eq!(dl.tracker().total(), Some(10_000));
        assert!(dl
            .partition_states()
            .iter()
            .all(|s| *s == DownloadState::Done));
        // Partition events are merged: one BEGIN, one END.
        assert_eq!(recorder.begin.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.end.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.error.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn unknown_size_forces_a_single_partition() {
        let data = body(3000);
        let mut transport = MemoryTransport::new(data.clone());
        transport.advertise_size = false;
        let dl = AcceleratedFileDownloader::new(Arc::new(transport), 4).unwrap();
        let recorder = Arc::new(Recorder::default());
        dl.add_listener(recorder.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unknown.bin");
        let written = dl
            .start(&Request::new("mem://unknown"), &path, &DownloadConfig::whole())
            .unwrap();

        assert_eq!(written, 3000);
        assert_eq!(dl.partition_states().len(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(dl.tracker().total(), Some(3000));
        assert_eq!(recorder.begin.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.end.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn partition_failure_stops_siblings_and_suppresses_end() {
        let data = body(16_384);
        let mut transport = MemoryTransport::new(data);
        transport.chunk = 512;
        transport.delay = Some(Duration::from_millis(10));
        // Partition 1 covers [4096, 8192); fail it after its first chunk.
        transport.fail_at = Some(4096);
        let dl = AcceleratedFileDownloader::new(Arc::new(transport), 4).unwrap();
        let recorder = Arc::new(Recorder::default());
        dl.add_listener(recorder.clone());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.bin");
        let err = dl
            .start(&Request::new("mem://failed"), &path, &DownloadConfig::whole())
            .unwrap_err();

        assert!(matches!(err, TransferError::Http(500)));
        assert_eq!(dl.tracker().state(), DownloadState::Error);
        assert_eq!(recorder.error.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.end.load(Ordering::Relaxed), 0);
        assert_eq!(recorder.begin.load(Ordering::Relaxed), 1);
        // Siblings were interrupted rather than left to finish.
        assert!(dl
            .partition_states()
            .iter()
            .any(|s| *s == DownloadState::Stopped));
        // Partial bytes are kept by default.
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn discard_policy_clears_the_file_on_error() {
        let data = body(16_384);
        let mut transport = MemoryTransport::new(data);
        transport.chunk = 512;
        transport.delay = Some(Duration::from_millis(10));
        transport.fail_at = Some(4096);
        let dl = AcceleratedFileDownloader::new(Arc::new(transport), 4)
            .unwrap()
            .keep_partial_on_error(false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discarded.bin");
        dl.start(&Request::new("mem://discarded"), &path, &DownloadConfig::whole())
            .unwrap_err();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn stop_then_start_resumes_to_a_byte_identical_file() {
        let data = body(8000);
        let mut transport = MemoryTransport::new(data.clone());
        transport.chunk = 256;
        transport.delay = Some(Duration::from_millis(5));
        let dl = Arc::new(
            AcceleratedFileDownloader::new(Arc::new(transport), 2).unwrap(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resumed.bin");
        let request = Request::new("mem://resumed");

        let runner = Arc::clone(&dl);
        let run_path = path.clone();
        let run_request = request.clone();
        let handle = std::thread::spawn(move || {
            runner.start(&run_request, &run_path, &DownloadConfig::whole())
        });
        std::thread::sleep(Duration::from_millis(30));
        dl.stop();
        let first = handle.join().unwrap().unwrap();
        assert!(first < 8000, "stop must interrupt the transfer");
        assert_eq!(dl.tracker().state(), DownloadState::Stopped);

        let second = dl.start(&request, &path, &DownloadConfig::whole()).unwrap();
        assert_eq!(first + second, 8000);
        assert_eq!(dl.tracker().state(), DownloadState::Done);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn control_calls_stay_responsive_while_planning() {
        let data = body(2000);
        let mut transport = MemoryTransport::new(data);
        transport.probe_delay = Some(Duration::from_millis(200));
        let dl = Arc::new(
            AcceleratedFileDownloader::new(Arc::new(transport), 4).unwrap(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planning.bin");
        let runner = Arc::clone(&dl);
        let run_path = path.clone();
        let handle = std::thread::spawn(move || {
            runner.start(&Request::new("mem://planning"), &run_path, &DownloadConfig::whole())
        });
        // Land inside the size probe, then exercise the control surface.
        std::thread::sleep(Duration::from_millis(50));
        let began = std::time::Instant::now();
        assert!(dl.partition_states().is_empty());
        dl.stop();
        dl.pause();
        assert!(
            began.elapsed() < Duration::from_millis(100),
            "control calls must not wait out the size probe"
        );
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn zero_partitions_is_a_config_error() {
        let transport = Arc::new(MemoryTransport::new(Vec::new()));
        assert!(matches!(
            AcceleratedFileDownloader::new(transport, 0),
            Err(TransferError::Config(_))
        ));
    }

    #[test]
    fn explicit_request_range_downloads_only_that_slice() {
        let data = body(1000);
        let transport = MemoryTransport::new(data.clone());
        let dl = AcceleratedFileDownloader::new(Arc::new(transport), 3).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.bin");
        let cfg = DownloadConfig::whole()
            .with_ranges(ByteRange::new(100, 700), ByteRange::new(0, 600))
            .unwrap();
        let written = dl.start(&Request::new("mem://slice"), &path, &cfg).unwrap();

        assert_eq!(written, 600);
        assert_eq!(dl.tracker().total(), Some(600));
        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[..600], &data[100..700]);
    }
}
