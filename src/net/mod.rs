//! Transport boundary: requests, response metadata, size probing.
//!
//! The engine consumes this interface; [`CurlTransport`] is the production
//! implementation. Tests substitute in-memory transports.

mod curl_transport;
pub(crate) mod parse;

pub use curl_transport::{CurlOptions, CurlTransport};

use std::collections::HashMap;

use crate::error::TransferError;
use crate::range::ByteRange;

/// One network request: URL, custom headers, and an optional byte range.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub range: Option<ByteRange>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            range: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn without_range(mut self) -> Self {
        self.range = None;
        self
    }
}

/// Parsed response metadata, delivered to the sink before the first body byte.
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    pub status: u32,
    /// `Content-Length` of this response (the range length for a 206).
    pub content_length: Option<u64>,
    /// Total resource size from `Content-Range: bytes a-b/total`.
    pub total_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

impl ResponseInfo {
    /// Best guess at the whole resource's size: `Content-Range` total when
    /// present (ranged response), otherwise `Content-Length`.
    pub fn resource_length(&self) -> Option<u64> {
        self.total_length.or(self.content_length)
    }
}

/// Consumer of one response: metadata first, then body chunks. Either callback
/// may return `false` to abort the transfer cooperatively; the transport then
/// returns [`TransferError::Stopped`].
pub trait TransferSink {
    fn headers(&mut self, info: &ResponseInfo) -> bool;
    fn data(&mut self, chunk: &[u8]) -> bool;
}

/// Outcome of a size probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeResult {
    /// Total resource length, `None` when the server does not reveal it.
    pub size: Option<u64>,
    /// Whether the server honours byte-range requests.
    pub accept_ranges: bool,
}

/// Blocking HTTP transport. Implementations must release the connection and
/// response stream on every exit path.
pub trait Transport: Send + Sync {
    /// Discovers the resource's total length and range support without
    /// transferring the body.
    fn probe(&self, request: &Request) -> Result<ProbeResult, TransferError>;

    /// Performs the request, streaming the body into `sink`. Returns
    /// `Err(TransferError::Stopped)` when the sink aborted.
    fn fetch(&self, request: &Request, sink: &mut dyn TransferSink)
        -> Result<(), TransferError>;
}
