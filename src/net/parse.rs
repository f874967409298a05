//! Parse collected HTTP response header lines into `ResponseInfo`.

use super::ResponseInfo;

/// Parses the status line plus header lines of one response. Lines arrive in
/// wire order; on redirects the caller clears the buffer at each new status
/// line, so only the final response is parsed here.
pub(crate) fn parse_headers(lines: &[String]) -> ResponseInfo {
    let mut info = ResponseInfo::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("HTTP/") {
            // "HTTP/1.1 206 Partial Content"
            if let Some(code) = rest.split_whitespace().nth(1) {
                if let Ok(code) = code.parse::<u32>() {
                    info.status = code;
                }
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    info.content_length = Some(n);
                }
            }
            if name.eq_ignore_ascii_case("accept-ranges") {
                info.accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
            if name.eq_ignore_ascii_case("content-range") {
                info.total_length = parse_content_range_total(value);
            }
        }
    }

    info
}

/// Extracts the total from `bytes a-b/total`. `None` for `bytes a-b/*`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.split_once('/')?;
    total.trim().parse::<u64>().ok()
}
