//! splitfetch - parallel ranged downloads of a single remote file
//!
//! A download probes the remote length, splits it into contiguous byte
//! ranges, fetches the ranges concurrently into private staging files, and
//! concatenates them into the destination in range order.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> splitfetch::Result<()> {
//! let outcome = splitfetch::download(
//!     "https://example.com/large.iso",
//!     "/tmp/large.iso",
//!     8,
//!     true,
//! )
//! .await?;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```
//!
//! For custom transports, retries or progress reporting, build a
//! [`Downloader`] with a [`DownloaderConfig`].

pub mod config;
pub mod coordinator;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod job;
pub mod logging;
pub mod merge;
pub mod outcome;
pub mod plan;
pub mod progress;
pub mod retry;
pub mod transport;

pub use config::DownloaderConfig;
pub use downloader::{download, download_blocking, download_with_config, Downloader};
pub use error::{DownloadError, FetchFailure, Result, TransportError};
pub use job::{DownloadJob, JobPhase, JobState};
pub use outcome::DownloadOutcome;
pub use plan::{plan_ranges, ByteRange};
pub use progress::ProgressCallback;
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, Transport, TransportConfig};
