//! Download orchestration.
//!
//! The [`Downloader`] drives one [`DownloadJob`] through its phases:
//!
//! 1. **Probe**: ask the transport for the resource length
//! 2. **Plan**: partition the length into contiguous ranges
//! 3. **Fetch**: stage every range concurrently via the [`Coordinator`]
//! 4. **Merge**: concatenate staged chunks into the destination
//!
//! The destination is not touched until every range has been staged, and
//! every failure path removes staging files before the error is returned.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DownloaderConfig;
use crate::coordinator::Coordinator;
use crate::error::{DownloadError, Result};
use crate::fetch::RangeFetcher;
use crate::job::{DownloadJob, JobPhase, JobState, JobStateMachine};
use crate::merge::merge_chunks;
use crate::outcome::{DownloadOutcome, ResultRecorder};
use crate::plan::plan_ranges;
use crate::progress::{ProgressCounters, ProgressReporter};
use crate::transport::{HttpTransport, Transport, TransportConfig};

/// Runs download jobs over a shared transport.
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    config: DownloaderConfig,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, config: DownloaderConfig) -> Self {
        Self { transport, config }
    }

    /// Create a downloader backed by an [`HttpTransport`].
    pub fn http(transport: TransportConfig, config: DownloaderConfig) -> Result<Self> {
        let transport = HttpTransport::new(transport)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Download `job.url()` into `job.destination()`.
    ///
    /// TLS validation is governed by the transport; `job.validate_tls()` is
    /// only consulted by the free [`download`] functions that build one.
    pub async fn download(&self, job: &DownloadJob) -> Result<DownloadOutcome> {
        let mut state = JobStateMachine::new();
        let parallelism = job.effective_parallelism();

        info!(
            url = %job.url(),
            destination = %job.destination().display(),
            parallelism,
            "Starting download"
        );

        state.advance(JobState::Probing)?;
        let total_size = match self.transport.probe(job.url()).await {
            Ok(size) => size,
            Err(cause) => {
                state.fail(JobPhase::Probing)?;
                warn!(url = %job.url(), error = %cause, "Size probe failed");
                return Err(DownloadError::SizeUnavailable {
                    url: job.url().to_string(),
                    cause,
                });
            }
        };

        state.advance(JobState::Planning)?;
        let ranges = plan_ranges(total_size, parallelism);

        state.advance(JobState::Fetching)?;
        let counters = Arc::new(ProgressCounters::new(ranges.len()));
        let reporter = self.config.progress.clone().map(|callback| {
            ProgressReporter::start(
                Arc::clone(&counters),
                total_size,
                callback,
                self.config.progress_interval,
            )
        });

        let fetcher = RangeFetcher::new(
            Arc::clone(&self.transport),
            job.url(),
            self.config.staging_dir.clone(),
            self.config.buffer_size,
        );
        let coordinator = Coordinator::new(fetcher, parallelism)
            .with_retry(self.config.retry)
            .with_progress(Arc::clone(&counters));

        let mut recorder = ResultRecorder::start(ranges.len());
        let fetched = coordinator.run(&ranges).await;
        recorder.finish_fetching();
        if let Some(reporter) = reporter {
            reporter.finish().await;
        }

        let chunks = match fetched {
            Ok(chunks) => chunks,
            Err(e) => {
                state.fail(JobPhase::Fetching)?;
                return Err(e);
            }
        };

        state.advance(JobState::Merging)?;
        if let Err(e) = merge_chunks(
            chunks,
            job.destination(),
            total_size,
            self.config.buffer_size,
        )
        .await
        {
            state.fail(JobPhase::Merging)?;
            warn!(destination = %job.destination().display(), error = %e, "Merge failed");
            return Err(e);
        }

        state.advance(JobState::Completed)?;
        let outcome = recorder.into_outcome(total_size, job.destination());
        info!(%outcome, "Download complete");
        Ok(outcome)
    }
}

/// Download `url` into `destination` over HTTP with default settings.
///
/// A `parallelism` of 0 selects the host's CPU count.
pub async fn download(
    url: &str,
    destination: impl AsRef<Path>,
    parallelism: usize,
    validate_tls: bool,
) -> Result<DownloadOutcome> {
    let job = DownloadJob::new(url, destination.as_ref())
        .with_parallelism(parallelism)
        .with_validate_tls(validate_tls);
    download_with_config(&job, TransportConfig::default(), DownloaderConfig::default()).await
}

/// Download `job` over a fresh [`HttpTransport`] built from `transport`.
///
/// The job's TLS validation flag overrides the one in `transport`.
pub async fn download_with_config(
    job: &DownloadJob,
    transport: TransportConfig,
    config: DownloaderConfig,
) -> Result<DownloadOutcome> {
    let transport = transport.with_validate_tls(job.validate_tls());
    Downloader::http(transport, config)?.download(job).await
}

/// Blocking form of [`download`] for callers without a Tokio runtime.
///
/// Must not be called from within an async context.
pub fn download_blocking(
    url: &str,
    destination: impl AsRef<Path>,
    parallelism: usize,
    validate_tls: bool,
) -> Result<DownloadOutcome> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| DownloadError::Runtime(e.to_string()))?;
    runtime.block_on(download(url, destination, parallelism, validate_tls))
}
