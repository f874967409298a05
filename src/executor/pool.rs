//! Fixed-size worker pool fed by a channel.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of exactly `size` worker threads pulling jobs from a shared channel.
/// `shutdown` closes the channel and joins every worker, so in-flight jobs
/// finish before it returns.
pub(crate) struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let rx = Arc::clone(&rx);
            workers.push(std::thread::spawn(move || loop {
                // Hold the receiver lock only for the recv itself.
                let job = rx.lock().unwrap().recv();
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }));
        }
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queues a job; returns false once the pool has shut down.
    pub(crate) fn execute(&self, job: Job) -> bool {
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Closes the job channel and blocks until every worker has drained.
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        drop(self.tx.lock().unwrap().take());
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.join() {
                tracing::warn!("pool worker panicked: {:?}", e);
            }
        }
    }
}
