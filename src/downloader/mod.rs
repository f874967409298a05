//! Segmented, resumable download engine.
//!
//! [`FileDownloader`] executes one ranged transfer into one region of the
//! destination file; [`AcceleratedFileDownloader`] splits a logical transfer
//! into N partitions, runs them concurrently and aggregates their lifecycle
//! and progress into one observable stream.

mod multi;
mod single;

pub use multi::AcceleratedFileDownloader;
pub use single::FileDownloader;

use std::fmt;
use std::sync::Arc;

use crate::error::TransferError;
use crate::net::ResponseInfo;
use crate::range::ByteRange;

/// Predicate a caller may attach to reject unexpected responses before any
/// byte is written.
pub type ResponseFilter = Arc<dyn Fn(&ResponseInfo) -> bool + Send + Sync>;

/// Immutable description of one logical transfer: which bytes to request,
/// where they land in the destination, and the total size when already known.
#[derive(Clone, Default)]
pub struct DownloadConfig {
    range_request: Option<ByteRange>,
    range_output: Option<ByteRange>,
    total_bytes: Option<u64>,
    response_filter: Option<ResponseFilter>,
}

impl DownloadConfig {
    /// Whole-resource transfer with no ranges and unknown size.
    pub fn whole() -> Self {
        Self::default()
    }

    /// Sets the request and output ranges. Fails fast when the lengths differ.
    pub fn with_ranges(
        mut self,
        request: ByteRange,
        output: ByteRange,
    ) -> Result<Self, TransferError> {
        if request.len() != output.len() {
            return Err(TransferError::Config(format!(
                "request range length {} != output range length {}",
                request.len(),
                output.len()
            )));
        }
        self.range_request = Some(request);
        self.range_output = Some(output);
        Ok(self)
    }

    /// Declares the known total resource size, skipping the size probe.
    pub fn with_total(mut self, total_bytes: u64) -> Self {
        self.total_bytes = Some(total_bytes);
        self
    }

    pub fn with_response_filter(
        mut self,
        filter: impl Fn(&ResponseInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.response_filter = Some(Arc::new(filter));
        self
    }

    /// Carries an already-shared filter into a derived per-partition config.
    pub(crate) fn with_filter_arc(mut self, filter: Option<ResponseFilter>) -> Self {
        self.response_filter = filter;
        self
    }

    pub fn range_request(&self) -> Option<ByteRange> {
        self.range_request
    }

    pub fn range_output(&self) -> Option<ByteRange> {
        self.range_output
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn response_filter(&self) -> Option<&ResponseFilter> {
        self.response_filter.as_ref()
    }
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("range_request", &self.range_request)
            .field("range_output", &self.range_output)
            .field("total_bytes", &self.total_bytes)
            .field("response_filter", &self.response_filter.is_some())
            .finish()
    }
}


#[cfg(test)]
pub(crate) mod testutil {
    //! In-memory transport for downloader tests.

    use std::time::Duration;

    use crate::net::{ProbeResult, Request, ResponseInfo, TransferSink, Transport};
    use crate::error::TransferError;

    /// Serves a fixed body with Range support. `fail_at` injects a network
    /// error (after one delivered chunk) for the request whose range starts at
    /// that offset. `delay` throttles each chunk so tests can pause/stop
    /// mid-transfer deterministically; `probe_delay` slows the size probe.
    /// `hide_length` strips all length headers from responses, simulating a
    /// server that never reveals the resource size.
    pub(crate) struct MemoryTransport {
        pub body: Vec<u8>,
        pub chunk: usize,
        pub advertise_size: bool,
        pub accept_ranges: bool,
        pub hide_length: bool,
        pub fail_at: Option<u64>,
        pub delay: Option<Duration>,
        pub probe_delay: Option<Duration>,
    }

    impl MemoryTransport {
        pub(crate) fn new(body: Vec<u8>) -> Self {
            Self {
                body,
                chunk: 1024,
                advertise_size: true,
                accept_ranges: true,
                hide_length: false,
                fail_at: None,
                delay: None,
                probe_delay: None,
            }
        }
    }

    impl Transport for MemoryTransport {
        fn probe(&self, _request: &Request) -> Result<ProbeResult, TransferError> {
            if let Some(delay) = self.probe_delay {
                std::thread::sleep(delay);
            }
            Ok(ProbeResult {
                size: self.advertise_size.then(|| self.body.len() as u64),
                accept_ranges: self.accept_ranges,
            })
        }

        fn fetch(
            &self,
            request: &Request,
            sink: &mut dyn TransferSink,
        ) -> Result<(), TransferError> {
            let total = self.body.len() as u64;
            let (start, end, status) = match request.range {
                Some(r) => (r.start.min(total), r.end.min(total), 206),
                None => (0, total, 200),
            };
            let info = ResponseInfo {
                status,
                content_length: (!self.hide_length).then_some(end - start),
                total_length: (!self.hide_length && status == 206).then_some(total),
                accept_ranges: true,
            };
            if !sink.headers(&info) {
                return Err(TransferError::Rejected);
            }
            let mut delivered = 0usize;
            for chunk in self.body[start as usize..end as usize].chunks(self.chunk) {
                if let Some(delay) = self.delay {
                    std::thread::sleep(delay);
                }
                if self.fail_at == Some(start) && delivered >= 1 {
                    return Err(TransferError::Http(500));
                }
                if !sink.data(chunk) {
                    return Err(TransferError::Stopped);
                }
                delivered += 1;
            }
            Ok(())
        }
    }
}
