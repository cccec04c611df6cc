//! Configuration for the downloader.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::progress::{ProgressCallback, DEFAULT_PROGRESS_INTERVAL};
use crate::retry::RetryPolicy;

/// Buffer size for staging writes and merge copies (64KB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for a [`Downloader`](crate::Downloader).
///
/// Network settings live in [`TransportConfig`](crate::TransportConfig);
/// this struct covers the local side of a download.
#[derive(Clone)]
pub struct DownloaderConfig {
    /// Directory for staging artifacts. Defaults to the OS temp dir.
    pub staging_dir: PathBuf,

    /// Buffer size for staging writes and merge copies.
    pub buffer_size: usize,

    /// Retry policy applied to each range.
    pub retry: RetryPolicy,

    /// Optional progress callback.
    pub progress: Option<ProgressCallback>,

    /// Interval between progress callbacks.
    pub progress_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            retry: RetryPolicy::none(),
            progress: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl fmt::Debug for DownloaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloaderConfig")
            .field("staging_dir", &self.staging_dir)
            .field("buffer_size", &self.buffer_size)
            .field("retry", &self.retry)
            .field("progress", &self.progress.is_some())
            .field("progress_interval", &self.progress_interval)
            .finish()
    }
}

impl DownloaderConfig {
    /// Set the staging directory.
    pub fn with_staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = path.into();
        self
    }

    /// Set the I/O buffer size (minimum 1 byte).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set the per-range retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Install a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, u64, usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(std::sync::Arc::new(callback));
        self
    }

    /// Set the interval between progress callbacks.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}
