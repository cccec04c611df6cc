//! Concurrency coordinator for range fetches.
//!
//! Spawns one task per planned range onto a [`JoinSet`], with a semaphore
//! capping how many fetch at once. Results land in an index-addressed table
//! (slot = range index), so completion order never affects merge order.
//!
//! # Failure Handling
//!
//! The first failed range cancels the shared [`CancellationToken`]. Sibling
//! tasks observe the token while waiting for a permit, while fetching, and
//! while backing off between retries; dropping their in-flight fetch removes
//! any partial staging file. The coordinator waits for every task to finish
//! before returning the error, and the chunks already collected are dropped
//! with the table, which deletes their staging files too.
//!
//! ```text
//! ranges ──► spawn ──► [permit] ──► fetch (+retry) ──► (index, result)
//!                          ▲               ▲                   │
//!                          └── cancel ─────┴───── first error ◄┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DownloadError, FetchFailure};
use crate::fetch::{ChunkResult, RangeFetcher};
use crate::plan::ByteRange;
use crate::progress::ProgressCounters;
use crate::retry::RetryPolicy;

/// Dispatches range fetches under a bounded-parallelism policy.
#[derive(Clone)]
pub struct Coordinator {
    fetcher: RangeFetcher,
    parallelism: usize,
    retry: RetryPolicy,
    progress: Option<Arc<ProgressCounters>>,
}

impl Coordinator {
    /// Create a coordinator running at most `parallelism` fetches at once
    /// (minimum 1).
    pub fn new(fetcher: RangeFetcher, parallelism: usize) -> Self {
        Self {
            fetcher,
            parallelism: parallelism.max(1),
            retry: RetryPolicy::none(),
            progress: None,
        }
    }

    /// Set the per-range retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish per-range progress into `counters`.
    pub fn with_progress(mut self, counters: Arc<ProgressCounters>) -> Self {
        self.progress = Some(counters);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Fetch every range, returning chunks ordered by range index.
    ///
    /// On failure, returns the first range error observed after all tasks
    /// have stopped and every staging file has been removed.
    pub async fn run(&self, ranges: &[ByteRange]) -> Result<Vec<ChunkResult>, DownloadError> {
        let mut slots: Vec<Option<ChunkResult>> = (0..ranges.len()).map(|_| None).collect();
        let permits = Arc::new(Semaphore::new(self.parallelism));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut owners: HashMap<task::Id, usize> = HashMap::with_capacity(ranges.len());

        for (index, range) in ranges.iter().copied().enumerate() {
            let worker = RangeWorker {
                fetcher: self.fetcher.clone(),
                retry: self.retry,
                progress: self.progress.clone(),
                permits: Arc::clone(&permits),
                cancel: cancel.clone(),
            };

            let handle = tasks.spawn(worker.run(index, range));
            owners.insert(handle.id(), index);
        }

        debug!(
            ranges = ranges.len(),
            parallelism = self.parallelism,
            "Dispatched range fetches"
        );

        let mut failure: Option<DownloadError> = None;

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_err) => (join_err.id(), Err(task_failure(&join_err))),
            };
            let Some(&index) = owners.get(&id) else {
                warn!(task = %id, "Joined a fetch task with no range");
                continue;
            };

            match result {
                Ok(chunk) => {
                    if let Some(ref counters) = self.progress {
                        counters.mark_completed(index, chunk.byte_count());
                    }
                    slots[index] = Some(chunk);
                }
                Err(cause) => {
                    if failure.is_none() {
                        warn!(range_index = index, error = %cause, "Range fetch failed, cancelling siblings");
                        cancel.cancel();
                        failure = Some(DownloadError::RangeFetch {
                            range_index: index,
                            cause,
                        });
                    } else {
                        debug!(range_index = index, error = %cause, "Range stopped after cancellation");
                    }
                }
            }
        }

        if let Some(err) = failure {
            // Dropping the table removes staging files of finished ranges.
            drop(slots);
            return Err(err);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| DownloadError::RangeFetch {
                    range_index: index,
                    cause: FetchFailure::Aborted("range produced no result".to_string()),
                })
            })
            .collect()
    }
}

fn task_failure(err: &JoinError) -> FetchFailure {
    if err.is_panic() {
        FetchFailure::Aborted("fetch task panicked".to_string())
    } else {
        FetchFailure::Aborted("fetch task cancelled".to_string())
    }
}

/// Everything one spawned fetch task owns.
struct RangeWorker {
    fetcher: RangeFetcher,
    retry: RetryPolicy,
    progress: Option<Arc<ProgressCounters>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RangeWorker {
    async fn run(self, index: usize, range: ByteRange) -> Result<ChunkResult, FetchFailure> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(FetchFailure::Aborted("cancelled while waiting for a permit".to_string()));
            }
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|e| FetchFailure::Aborted(e.to_string()))?,
        };

        let mut attempt = 1u32;
        loop {
            let failure = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(FetchFailure::Aborted("cancelled during fetch".to_string()));
                }
                result = self.fetcher.fetch(index, range, self.progress.as_deref()) => match result {
                    Ok(chunk) => return Ok(chunk),
                    Err(failure) => failure,
                },
            };

            let Some(delay) = self.retry.next_delay(&failure, attempt) else {
                return Err(failure);
            };

            warn!(
                range_index = index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Retrying range"
            );
            if let Some(ref counters) = self.progress {
                counters.update_range(index, 0);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(FetchFailure::Aborted("cancelled during backoff".to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
