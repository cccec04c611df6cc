//! Download job description and per-job state machine.
//!
//! A [`DownloadJob`] is the immutable request handed to the
//! [`Downloader`](crate::Downloader). While the job runs, a
//! [`JobStateMachine`] tracks its progress through the phases:
//!
//! ```text
//! Init → Probing → Planning → Fetching → Merging → Completed
//!           │                     │          │
//!           └──────────┬──────────┴──────────┘
//!                      ▼
//!               Failed(phase)
//! ```
//!
//! No transition re-enters an earlier state; a job is single-shot.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::InvalidTransition;
use crate::plan::resolve_parallelism;

/// Immutable description of one download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    url: String,
    destination: PathBuf,
    parallelism: usize,
    validate_tls: bool,
}

impl DownloadJob {
    /// Create a job with default parallelism (host CPU count) and TLS
    /// certificate validation enabled.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            parallelism: 0,
            validate_tls: true,
        }
    }

    /// Set the requested parallelism degree. `0` selects the host default.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Enable or disable TLS certificate validation.
    pub fn with_validate_tls(mut self, validate: bool) -> Self {
        self.validate_tls = validate;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// The parallelism degree as requested (possibly `0`).
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// The parallelism degree after substituting the host default for `0`.
    pub fn effective_parallelism(&self) -> usize {
        resolve_parallelism(self.parallelism)
    }

    pub fn validate_tls(&self) -> bool {
        self.validate_tls
    }
}

/// Phases in which a job can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    Probing,
    Fetching,
    Merging,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probing => write!(f, "probing"),
            Self::Fetching => write!(f, "fetching"),
            Self::Merging => write!(f, "merging"),
        }
    }
}

/// State of a single download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Init,
    Probing,
    Planning,
    Fetching,
    Merging,
    Completed,
    /// Terminal failure in the given phase.
    Failed(JobPhase),
}

impl JobState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        matches!(
            (*self, next),
            (Init, Probing)
                | (Probing, Planning)
                | (Planning, Fetching)
                | (Fetching, Merging)
                | (Merging, Completed)
                | (Probing, Failed(JobPhase::Probing))
                | (Fetching, Failed(JobPhase::Fetching))
                | (Merging, Failed(JobPhase::Merging))
        )
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Tracks the state of one job and rejects out-of-order transitions.
#[derive(Debug)]
pub struct JobStateMachine {
    state: JobState,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self {
            state: JobState::Init,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, or report the illegal transition.
    pub fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Job state transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed(phase)`.
    pub fn fail(&mut self, phase: JobPhase) -> Result<(), InvalidTransition> {
        self.advance(JobState::Failed(phase))
    }
}
