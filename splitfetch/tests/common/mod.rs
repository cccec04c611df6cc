//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use splitfetch::transport::{BoxFuture, ByteStream};
use splitfetch::{ByteRange, Transport, TransportError};

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Number of entries in `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// In-memory transport with failure injection keyed by range start.
pub struct StubTransport {
    body: Vec<u8>,
    probe_error: Option<TransportError>,
    range_errors: HashMap<u64, TransportError>,
    delays: HashMap<u64, Duration>,
    stalled: HashSet<u64>,
    pub range_requests: AtomicUsize,
    /// Requests dropped before they produced a response.
    pub abandoned_requests: AtomicUsize,
}

/// Counts a request as abandoned if dropped while still pending.
struct Pending<'a> {
    abandoned: &'a AtomicUsize,
    done: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl StubTransport {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            probe_error: None,
            range_errors: HashMap::new(),
            delays: HashMap::new(),
            stalled: HashSet::new(),
            range_requests: AtomicUsize::new(0),
            abandoned_requests: AtomicUsize::new(0),
        }
    }

    pub fn failing_probe(mut self, error: TransportError) -> Self {
        self.probe_error = Some(error);
        self
    }

    pub fn failing_range(mut self, start: u64, error: TransportError) -> Self {
        self.range_errors.insert(start, error);
        self
    }

    /// The request for the range starting at `start` never completes.
    pub fn stalled_range(mut self, start: u64) -> Self {
        self.stalled.insert(start);
        self
    }

    pub fn slow_range(mut self, start: u64, delay: Duration) -> Self {
        self.delays.insert(start, delay);
        self
    }
}

impl Transport for StubTransport {
    fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move {
            match &self.probe_error {
                Some(err) => Err(err.clone()),
                None => Ok(self.body.len() as u64),
            }
        })
    }

    fn fetch_range<'a>(
        &'a self,
        _url: &'a str,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<ByteStream, TransportError>> {
        Box::pin(async move {
            self.range_requests.fetch_add(1, Ordering::SeqCst);
            let mut pending = Pending {
                abandoned: &self.abandoned_requests,
                done: false,
            };
            if self.stalled.contains(&range.start()) {
                futures::future::pending::<()>().await;
            }
            if let Some(delay) = self.delays.get(&range.start()) {
                tokio::time::sleep(*delay).await;
            }
            pending.done = true;
            if let Some(err) = self.range_errors.get(&range.start()) {
                return Err(err.clone());
            }

            let start = range.start() as usize;
            let end = start + range.len() as usize;
            let chunks: Vec<Result<Bytes, TransportError>> = self.body[start..end]
                .chunks(7)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(futures::stream::iter(chunks).boxed())
        })
    }
}
