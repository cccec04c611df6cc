//! Result recording for completed downloads.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Summary of a completed download, returned once to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    total_size: u64,
    elapsed: Duration,
    destination: PathBuf,
    achieved_parallelism: usize,
}

impl DownloadOutcome {
    /// Size of the merged file in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Wall-clock time from dispatch until the last range was staged.
    /// Merge time is not included.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Number of ranges actually dispatched.
    pub fn achieved_parallelism(&self) -> usize {
        self.achieved_parallelism
    }

    /// Average fetch throughput, or 0 when no time elapsed.
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_size as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes to {} in {:.3}s over {} range(s) ({:.1} KB/s)",
            self.total_size,
            self.destination.display(),
            self.elapsed.as_secs_f64(),
            self.achieved_parallelism,
            self.throughput_bytes_per_sec() / 1024.0
        )
    }
}

/// Measures the fetch phase of one job.
#[derive(Debug)]
pub struct ResultRecorder {
    started: Instant,
    dispatched: usize,
    elapsed: Option<Duration>,
}

impl ResultRecorder {
    /// Start timing at dispatch of `dispatched` ranges.
    pub fn start(dispatched: usize) -> Self {
        Self {
            started: Instant::now(),
            dispatched,
            elapsed: None,
        }
    }

    /// Stop the clock once every range is staged.
    pub fn finish_fetching(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started.elapsed());
        }
    }

    /// Build the outcome for a merged file.
    pub fn into_outcome(self, total_size: u64, destination: impl Into<PathBuf>) -> DownloadOutcome {
        DownloadOutcome {
            total_size,
            elapsed: self.elapsed.unwrap_or_else(|| self.started.elapsed()),
            destination: destination.into(),
            achieved_parallelism: self.dispatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_builds_outcome() {
        let mut recorder = ResultRecorder::start(3);
        std::thread::sleep(Duration::from_millis(5));
        recorder.finish_fetching();
        let outcome = recorder.into_outcome(10, "/tmp/out.bin");

        assert_eq!(outcome.total_size(), 10);
        assert_eq!(outcome.achieved_parallelism(), 3);
        assert_eq!(outcome.destination(), Path::new("/tmp/out.bin"));
        assert!(outcome.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_elapsed_frozen_at_finish() {
        let mut recorder = ResultRecorder::start(1);
        recorder.finish_fetching();
        let frozen = recorder.elapsed;
        std::thread::sleep(Duration::from_millis(5));
        recorder.finish_fetching();
        assert_eq!(recorder.elapsed, frozen);
    }

    #[test]
    fn test_throughput() {
        let outcome = DownloadOutcome {
            total_size: 2048,
            elapsed: Duration::from_secs(2),
            destination: PathBuf::from("/tmp/out.bin"),
            achieved_parallelism: 4,
        };
        assert_eq!(outcome.throughput_bytes_per_sec(), 1024.0);
        assert_eq!(
            outcome.to_string(),
            "2048 bytes to /tmp/out.bin in 2.000s over 4 range(s) (1.0 KB/s)"
        );
    }

    #[test]
    fn test_throughput_zero_elapsed() {
        let outcome = DownloadOutcome {
            total_size: 2048,
            elapsed: Duration::ZERO,
            destination: PathBuf::from("/tmp/out.bin"),
            achieved_parallelism: 1,
        };
        assert_eq!(outcome.throughput_bytes_per_sec(), 0.0);
    }
}
