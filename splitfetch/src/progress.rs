//! Progress reporting for ranged downloads.
//!
//! Fetch tasks publish per-range byte counts into shared atomic
//! [`ProgressCounters`]. A [`ProgressReporter`] task polls the counters on an
//! interval and invokes the caller's callback with aggregated totals.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default interval between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Progress callback with byte-level updates.
///
/// # Arguments
///
/// * `bytes_fetched` - Bytes staged so far across all ranges
/// * `total_bytes` - Probed size of the resource
/// * `ranges_completed` - Number of ranges fully staged
/// * `range_count` - Number of planned ranges
pub type ProgressCallback = Arc<dyn Fn(u64, u64, usize, usize) + Send + Sync>;

/// Shared progress counters for concurrent range fetches.
#[derive(Debug)]
pub struct ProgressCounters {
    range_bytes: Vec<AtomicU64>,
    ranges_completed: AtomicUsize,
}

impl ProgressCounters {
    /// Create counters for `range_count` ranges.
    pub fn new(range_count: usize) -> Self {
        Self {
            range_bytes: (0..range_count).map(|_| AtomicU64::new(0)).collect(),
            ranges_completed: AtomicUsize::new(0),
        }
    }

    pub fn range_count(&self) -> usize {
        self.range_bytes.len()
    }

    /// Total bytes staged across all ranges.
    pub fn total_bytes(&self) -> u64 {
        self.range_bytes
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .sum()
    }

    pub fn completed_ranges(&self) -> usize {
        self.ranges_completed.load(Ordering::Relaxed)
    }

    /// Record that range `index` has staged `bytes` so far.
    ///
    /// A retried range starts again from zero.
    pub fn update_range(&self, index: usize, bytes: u64) {
        if let Some(counter) = self.range_bytes.get(index) {
            counter.store(bytes, Ordering::Relaxed);
        }
    }

    /// Mark range `index` as fully staged with `final_bytes`.
    pub fn mark_completed(&self, index: usize, final_bytes: u64) {
        if let Some(counter) = self.range_bytes.get(index) {
            counter.store(final_bytes, Ordering::Relaxed);
            self.ranges_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn report(&self, total_size: u64, callback: &ProgressCallback) {
        callback(
            self.total_bytes(),
            total_size,
            self.completed_ranges(),
            self.range_count(),
        );
    }
}

/// Background task that periodically reports progress.
///
/// Stops when [`finish`](Self::finish) is awaited or the reporter is dropped.
/// A final report is always emitted on stop.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl ProgressReporter {
    /// Start reporting. Must be called from within a Tokio runtime.
    pub fn start(
        counters: Arc<ProgressCounters>,
        total_size: u64,
        callback: ProgressCallback,
        interval: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => counters.report(total_size, &callback),
                }
            }
            counters.report(total_size, &callback);
        });

        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Stop the reporter and wait for its final report.
    pub async fn finish(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_counters_new() {
        let counters = ProgressCounters::new(3);
        assert_eq!(counters.range_count(), 3);
        assert_eq!(counters.total_bytes(), 0);
        assert_eq!(counters.completed_ranges(), 0);
    }

    #[test]
    fn test_progress_counters_update_range() {
        let counters = ProgressCounters::new(2);

        counters.update_range(0, 500);
        counters.update_range(1, 300);
        assert_eq!(counters.total_bytes(), 800);

        // retry restarts the range
        counters.update_range(1, 0);
        assert_eq!(counters.total_bytes(), 500);
    }

    #[test]
    fn test_progress_counters_out_of_bounds_ignored() {
        let counters = ProgressCounters::new(1);
        counters.update_range(5, 100);
        counters.mark_completed(5, 100);
        assert_eq!(counters.total_bytes(), 0);
        assert_eq!(counters.completed_ranges(), 0);
    }

    #[test]
    fn test_progress_counters_mark_completed() {
        let counters = ProgressCounters::new(2);
        counters.mark_completed(0, 1000);

        assert_eq!(counters.completed_ranges(), 1);
        assert_eq!(counters.total_bytes(), 1000);
    }

    #[tokio::test]
    async fn test_progress_reporter_final_report() {
        let counters = Arc::new(ProgressCounters::new(2));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);

        let callback: ProgressCallback = Arc::new(move |bytes, total, done, count| {
            sink.lock().unwrap().push((bytes, total, done, count));
        });

        let reporter = ProgressReporter::start(
            Arc::clone(&counters),
            1000,
            callback,
            Duration::from_millis(5),
        );

        counters.mark_completed(0, 600);
        counters.mark_completed(1, 400);
        reporter.finish().await;

        let reports = reports.lock().unwrap();
        assert!(!reports.is_empty());
        assert_eq!(reports.last(), Some(&(1000, 1000, 2, 2)));
    }
}
