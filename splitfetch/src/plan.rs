//! Range planning.
//!
//! Splits a resource of `total_size` bytes into contiguous, non-overlapping
//! byte ranges, one per fetcher. The first `count - 1` ranges get
//! `total_size / count` bytes each and the last range absorbs the remainder,
//! so any skew always lands on the final range.
//!
//! ```text
//! total_size = 10, parallelism = 3
//!
//! [0 1 2][3 4 5][6 7 8 9]
//!  0-2    3-5    6-9
//! ```

use std::fmt;
use std::num::NonZeroUsize;

/// A contiguous byte interval of the remote resource.
///
/// Stored as `start` plus length so the degenerate empty range of a
/// zero-length resource is representable; [`ByteRange::end`] gives the
/// inclusive end offset used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    start: u64,
    len: u64,
}

impl ByteRange {
    /// Create a range of `len` bytes beginning at `start`.
    pub const fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// Create a range from inclusive `start` and `end` offsets.
    ///
    /// # Panics
    ///
    /// Panics if `end < start`.
    pub fn inclusive(start: u64, end: u64) -> Self {
        assert!(end >= start, "range end {end} precedes start {start}");
        Self::new(start, end - start + 1)
    }

    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Number of bytes covered, `end - start + 1` for non-empty ranges.
    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inclusive end offset, or `None` for the empty range.
    pub const fn end(&self) -> Option<u64> {
        if self.len == 0 {
            None
        } else {
            Some(self.start + self.len - 1)
        }
    }

    /// Value for an HTTP `Range` header (`bytes=start-end`).
    pub fn header_value(&self) -> Option<String> {
        self.end().map(|end| format!("bytes={}-{}", self.start, end))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "empty@{}", self.start),
        }
    }
}

/// Number of concurrent execution units on this host, or 1 if unknown.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Substitute the host default for a requested parallelism of `0`.
pub fn resolve_parallelism(requested: usize) -> usize {
    if requested == 0 {
        default_parallelism()
    } else {
        requested
    }
}

/// Partition `[0, total_size)` into `min(parallelism, max(1, total_size))`
/// ranges, sorted by start.
///
/// A `parallelism` of `0` selects [`default_parallelism`]. A zero-length
/// resource yields a single empty range.
pub fn plan_ranges(total_size: u64, parallelism: usize) -> Vec<ByteRange> {
    if total_size == 0 {
        return vec![ByteRange::new(0, 0)];
    }

    let parallelism = resolve_parallelism(parallelism) as u64;
    let count = parallelism.min(total_size);
    let share = total_size / count;

    (0..count)
        .map(|i| {
            let start = i * share;
            let len = if i + 1 == count {
                total_size - start
            } else {
                share
            };
            ByteRange::new(start, len)
        })
        .collect()
}
