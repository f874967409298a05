//! Half-open byte ranges and partition planning.
//!
//! All ranges in the engine are half-open `[start, end)`; the inclusive form
//! only appears when rendering an HTTP `Range` header.

use serde::{Deserialize, Serialize};

/// A contiguous byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Length of this range in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// HTTP `Range` header value (inclusive end): `bytes=start-(end-1)`.
    pub fn header_value(&self) -> String {
        if self.is_empty() {
            "bytes=0-0".to_string()
        } else {
            format!("bytes={}-{}", self.start, self.end - 1)
        }
    }

    /// Returns this range with the start advanced by `n` bytes, clamped to the
    /// end. Used to compute the remaining range after a partial transfer.
    pub fn advanced(&self, n: u64) -> ByteRange {
        ByteRange {
            start: (self.start + n).min(self.end),
            end: self.end,
        }
    }
}

/// Splits `[0, size)` into up to `count` contiguous partitions of
/// `ceil(size / count)` bytes, the last one clipped to the true end.
/// Partitions tile the range exactly: no gaps, no overlaps. Trailing empty
/// partitions are dropped, so fewer than `count` may be returned for tiny
/// sizes. Returns an empty vec when `size` or `count` is 0.
pub fn partition(size: u64, count: usize) -> Vec<ByteRange> {
    if size == 0 || count == 0 {
        return Vec::new();
    }

    let count = count as u64;
    let chunk = size.div_ceil(count);
    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    while offset < size {
        let end = (offset + chunk).min(size);
        out.push(ByteRange::new(offset, end));
        offset = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_even() {
        let parts = partition(1000, 4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], ByteRange::new(0, 250));
        assert_eq!(parts[1], ByteRange::new(250, 500));
        assert_eq!(parts[2], ByteRange::new(500, 750));
        assert_eq!(parts[3], ByteRange::new(750, 1000));
    }

    #[test]
    fn partition_ceil_with_clipped_tail() {
        // 10/3 -> chunk 4: [0,4) [4,8) [8,10)
        let parts = partition(10, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ByteRange::new(0, 4));
        assert_eq!(parts[1], ByteRange::new(4, 8));
        assert_eq!(parts[2], ByteRange::new(8, 10));
    }

    #[test]
    fn partition_tiles_exactly() {
        for size in [1u64, 7, 10, 64, 1000, 4097] {
            for count in [1usize, 2, 3, 4, 7, 16] {
                let parts = partition(size, count);
                let mut offset = 0u64;
                let mut total = 0u64;
                for p in &parts {
                    assert_eq!(p.start, offset, "gap or overlap at {:?}", p);
                    assert!(!p.is_empty());
                    offset = p.end;
                    total += p.len();
                }
                assert_eq!(offset, size);
                assert_eq!(total, size);
            }
        }
    }

    #[test]
    fn partition_more_threads_than_bytes() {
        let parts = partition(3, 8);
        assert_eq!(parts.len(), 3);
        for (i, p) in parts.iter().enumerate() {
            assert_eq!(p.len(), 1, "partition {}", i);
        }
    }

    #[test]
    fn partition_empty() {
        assert!(partition(0, 4).is_empty());
        assert!(partition(100, 0).is_empty());
    }

    #[test]
    fn range_header_value() {
        let r = ByteRange::new(0, 99);
        assert_eq!(r.header_value(), "bytes=0-98");
        assert_eq!(r.len(), 99);
        assert_eq!(ByteRange::new(42, 43).header_value(), "bytes=42-42");
    }

    #[test]
    fn range_advanced_clamps() {
        let r = ByteRange::new(10, 20);
        assert_eq!(r.advanced(4), ByteRange::new(14, 20));
        assert_eq!(r.advanced(10), ByteRange::new(20, 20));
        assert_eq!(r.advanced(500), ByteRange::new(20, 20));
        assert!(r.advanced(10).is_empty());
    }
}
