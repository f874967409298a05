//! libcurl-backed transport: HEAD size probe with a Range-GET fallback, and
//! ranged GETs with header capture.

use std::cell::RefCell;
use std::str;
use std::time::Duration;

use crate::error::TransferError;

use super::parse::parse_headers;
use super::{ProbeResult, Request, TransferSink, Transport};

/// curl handle tuning shared by every request of one transport instance.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout_secs: u64,
    /// Abort when throughput stays below this many bytes/sec ...
    pub low_speed_limit: u32,
    /// ... for this long. Keeps slow links alive without a tight wall clock.
    pub low_speed_time_secs: u64,
    /// Safety net so a completely stuck transfer eventually fails.
    pub timeout_secs: u64,
    /// Optional receive-speed cap in bytes/sec.
    pub max_recv_speed: Option<u64>,
    /// Optional curl buffer size hint.
    pub buffer_size: Option<usize>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            timeout_secs: 3600,
            max_recv_speed: None,
            buffer_size: None,
        }
    }
}

/// Production [`Transport`] over libcurl `Easy` handles, one per request.
/// Handles and response streams are scoped to each call, so they are released
/// on every exit path.
#[derive(Debug, Default, Clone)]
pub struct CurlTransport {
    options: CurlOptions,
}

impl CurlTransport {
    pub fn new(options: CurlOptions) -> Self {
        Self { options }
    }
}

/// Why the write callback told curl to stop.
enum Abort {
    SinkStopped,
    Rejected,
    Http(u32),
}

fn configure(easy: &mut curl::easy::Easy, request: &Request, opts: &CurlOptions)
    -> Result<(), TransferError>
{
    easy.url(&request.url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(opts.connect_timeout_secs))?;
    easy.low_speed_limit(opts.low_speed_limit)?;
    easy.low_speed_time(Duration::from_secs(opts.low_speed_time_secs))?;
    easy.timeout(Duration::from_secs(opts.timeout_secs))?;
    if let Some(speed) = opts.max_recv_speed {
        easy.max_recv_speed(speed)?;
    }
    if let Some(size) = opts.buffer_size {
        easy.buffer_size(size)?;
    }

    if !request.headers.is_empty() {
        let mut list = curl::easy::List::new();
        for (name, value) in &request.headers {
            list.append(&format!("{}: {}", name.trim(), value.trim()))?;
        }
        easy.http_headers(list)?;
    }
    if let Some(range) = request.range {
        // libcurl takes the bare inclusive form, e.g. "0-99".
        easy.range(&format!("{}-{}", range.start, range.end.saturating_sub(1)))?;
    }
    Ok(())
}

/// Collects header lines, restarting at each new status line so redirects do
/// not pollute the final response's headers.
fn collect_header_line(lines: &RefCell<Vec<String>>, data: &[u8]) {
    if let Ok(s) = str::from_utf8(data) {
        let s = s.trim_end();
        if s.starts_with("HTTP/") {
            lines.borrow_mut().clear();
        }
        lines.borrow_mut().push(s.to_string());
    }
}

impl Transport for CurlTransport {
    fn probe(&self, request: &Request) -> Result<ProbeResult, TransferError> {
        // HEAD first.
        let head_lines = RefCell::new(Vec::new());
        let mut easy = curl::easy::Easy::new();
        configure(&mut easy, &request.clone().without_range(), &self.options)?;
        easy.nobody(true)?;
        let head_result = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                collect_header_line(&head_lines, data);
                true
            })?;
            transfer.perform()
        };
        if head_result.is_ok() {
            let code = easy.response_code()?;
            if (200..300).contains(&code) {
                let info = parse_headers(&head_lines.borrow());
                if let Some(len) = info.resource_length() {
                    return Ok(ProbeResult {
                        size: Some(len),
                        accept_ranges: info.accept_ranges,
                    });
                }
            }
            tracing::debug!(code, "HEAD probe inconclusive, trying range probe");
        } else {
            tracing::debug!("HEAD probe failed, trying range probe");
        }

        // Fallback: GET the first byte and read the total from Content-Range.
        // Servers that block HEAD usually still answer this.
        let probe = request
            .clone()
            .with_range(crate::range::ByteRange::new(0, 1));
        let lines = RefCell::new(Vec::new());
        let mut easy = curl::easy::Easy::new();
        configure(&mut easy, &probe, &self.options)?;
        let result = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                collect_header_line(&lines, data);
                true
            })?;
            // Headers are all we want; abort as soon as the body starts.
            transfer.write_function(|_data| Ok(0))?;
            transfer.perform()
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_write_error() => {}
            Err(e) => return Err(TransferError::Curl(e)),
        }
        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(TransferError::Http(code));
        }
        let info = parse_headers(&lines.borrow());
        if code == 206 {
            // The range was honoured, whether or not it was advertised.
            return Ok(ProbeResult {
                size: info.total_length,
                accept_ranges: true,
            });
        }
        // Server ignored the range; a 200 Content-Length is still the total.
        Ok(ProbeResult {
            size: info.content_length,
            accept_ranges: info.accept_ranges,
        })
    }

    fn fetch(
        &self,
        request: &Request,
        sink: &mut dyn TransferSink,
    ) -> Result<(), TransferError> {
        let lines = RefCell::new(Vec::new());
        let delivered = RefCell::new(false);
        let abort: RefCell<Option<Abort>> = RefCell::new(None);
        let sink = RefCell::new(sink);

        let mut easy = curl::easy::Easy::new();
        configure(&mut easy, request, &self.options)?;

        let perform_result = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                collect_header_line(&lines, data);
                true
            })?;
            transfer.write_function(|data| {
                if !*delivered.borrow() {
                    let info = parse_headers(&lines.borrow());
                    if !(200..300).contains(&info.status) {
                        *abort.borrow_mut() = Some(Abort::Http(info.status));
                        return Ok(0);
                    }
                    if !sink.borrow_mut().headers(&info) {
                        *abort.borrow_mut() = Some(Abort::Rejected);
                        return Ok(0);
                    }
                    *delivered.borrow_mut() = true;
                }
                if sink.borrow_mut().data(data) {
                    Ok(data.len())
                } else {
                    *abort.borrow_mut() = Some(Abort::SinkStopped);
                    Ok(0)
                }
            })?;
            transfer.perform()
        };

        if let Err(e) = perform_result {
            if e.is_write_error() {
                return match abort.borrow_mut().take() {
                    Some(Abort::SinkStopped) => Err(TransferError::Stopped),
                    Some(Abort::Rejected) => Err(TransferError::Rejected),
                    Some(Abort::Http(code)) => Err(TransferError::Http(code)),
                    None => Err(TransferError::Curl(e)),
                };
            }
            return Err(TransferError::Curl(e));
        }

        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(TransferError::Http(code));
        }
        // Zero-byte bodies never hit the write callback; still surface the
        // response metadata once.
        if !*delivered.borrow() {
            let info = parse_headers(&lines.borrow());
            if !sink.borrow_mut().headers(&info) {
                return Err(TransferError::Rejected);
            }
        }
        Ok(())
    }
}
