//! Error types for ranged downloads.
//!
//! Errors are layered the same way the download flows:
//!
//! - [`TransportError`]: a single probe or range request failed
//! - [`FetchFailure`]: why one Range Fetcher gave up (transport, staging I/O,
//!   or a body that did not match the requested range)
//! - [`DownloadError`]: the job-level failure returned to the caller, naming
//!   the phase and, for fetch failures, the range index

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::job::{JobPhase, JobState};

/// Result type for download operations.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be sent or no response was received.
    #[error("request failed: {0}")]
    Request(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server answered with a status that does not satisfy the request.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The server did not report a content length.
    #[error("response did not report a content length")]
    MissingLength,

    /// The server reported a content length that is not a number.
    #[error("invalid content length: {0:?}")]
    InvalidLength(String),

    /// The response body stream failed mid-transfer.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl TransportError {
    /// Whether a retry of the same request could plausibly succeed.
    ///
    /// Timeouts, dropped connections, truncated bodies, `429` and `5xx`
    /// responses are transient. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) | Self::Body(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::MissingLength | Self::InvalidLength(_) | Self::Client(_) => false,
        }
    }
}

/// Why a single range fetch failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// The range request or its body stream failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The staging file could not be created or written.
    #[error("staging I/O failed: {0}")]
    Staging(#[from] io::Error),

    /// The body ended before the whole range arrived.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// The body carried more bytes than the range asked for.
    #[error("range not honoured: body exceeded {expected} bytes")]
    Overrun { expected: u64 },

    /// The fetch was cancelled or its task died.
    #[error("fetch aborted: {0}")]
    Aborted(String),
}

impl FetchFailure {
    /// Whether the retry layer may attempt this range again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::ShortRead { .. } => true,
            Self::Staging(_) | Self::Overrun { .. } | Self::Aborted(_) => false,
        }
    }
}

/// A job state transition that the state machine does not allow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Errors that end a download job.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The size probe could not determine the remote length.
    #[error("size of {url} unavailable: {cause}")]
    SizeUnavailable {
        url: String,
        #[source]
        cause: TransportError,
    },

    /// A range could not be fetched.
    #[error("range {range_index} failed: {cause}")]
    RangeFetch {
        range_index: usize,
        #[source]
        cause: FetchFailure,
    },

    /// Destination or staging I/O failed while merging.
    #[error("failed to merge into {}: {source}", .path.display())]
    MergeIo { path: PathBuf, source: io::Error },

    /// The merged file does not have the probed length.
    #[error("merged {actual} bytes into {} but expected {expected}", .path.display())]
    MergeLength {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The transport could not be set up for the job.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The job state machine was driven out of order.
    #[error(transparent)]
    State(#[from] InvalidTransition),

    /// The blocking facade could not create its runtime.
    #[error("failed to create Tokio runtime: {0}")]
    Runtime(String),
}

impl DownloadError {
    /// The job phase that failed, if the failure happened inside the job.
    pub fn phase(&self) -> Option<JobPhase> {
        match self {
            Self::SizeUnavailable { .. } => Some(JobPhase::Probing),
            Self::RangeFetch { .. } => Some(JobPhase::Fetching),
            Self::MergeIo { .. } | Self::MergeLength { .. } => Some(JobPhase::Merging),
            Self::Transport(_) | Self::State(_) | Self::Runtime(_) => None,
        }
    }

    /// The index of the range that failed, for fetch failures.
    pub fn range_index(&self) -> Option<usize> {
        match self {
            Self::RangeFetch { range_index, .. } => Some(*range_index),
            _ => None,
        }
    }
}
