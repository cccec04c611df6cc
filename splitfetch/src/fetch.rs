//! Range fetcher and staged chunks.
//!
//! A [`RangeFetcher`] retrieves one [`ByteRange`] and streams it into a fresh
//! staging file. The staging file is owned by a [`tempfile::TempPath`], so it
//! is removed on every exit path: an early return on failure, a cancelled
//! fetch task, or a [`ChunkResult`] dropped without being merged.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tempfile::TempPath;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::FetchFailure;
use crate::plan::ByteRange;
use crate::progress::ProgressCounters;
use crate::transport::Transport;

/// File name prefix of staging artifacts.
pub const STAGING_PREFIX: &str = "splitfetch-";

/// File name suffix of staging artifacts.
pub const STAGING_SUFFIX: &str = ".part";

/// One staged range, ready for merging.
///
/// Dropping a `ChunkResult` deletes its staging file.
#[derive(Debug)]
pub struct ChunkResult {
    range_index: usize,
    range: ByteRange,
    staging: TempPath,
    byte_count: u64,
}

impl ChunkResult {
    pub fn range_index(&self) -> usize {
        self.range_index
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Bytes written to the staging file; always equals `range().len()`.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Hand the staging file over to the merger.
    pub(crate) fn into_staging(self) -> TempPath {
        self.staging
    }
}

/// Fetches single ranges of one URL into staging files.
///
/// Cheap to clone; each spawned fetch task holds its own copy.
#[derive(Clone)]
pub struct RangeFetcher {
    transport: Arc<dyn Transport>,
    url: Arc<str>,
    staging_dir: Arc<Path>,
    buffer_size: usize,
}

impl RangeFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        url: impl Into<Arc<str>>,
        staging_dir: impl Into<PathBuf>,
        buffer_size: usize,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            staging_dir: Arc::from(staging_dir.into()),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Fetch `range` into a new staging file.
    ///
    /// Fails if the request fails, the body stream breaks, or the body does
    /// not contain exactly `range.len()` bytes. No retries are attempted.
    pub async fn fetch(
        &self,
        range_index: usize,
        range: ByteRange,
        progress: Option<&ProgressCounters>,
    ) -> Result<ChunkResult, FetchFailure> {
        let dir = Arc::clone(&self.staging_dir);
        let (file, staging) = tokio::task::spawn_blocking(move || create_staging_file(&dir))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        let mut writer = BufWriter::with_capacity(self.buffer_size, tokio::fs::File::from_std(file));

        let expected = range.len();
        let mut written = 0u64;

        if !range.is_empty() {
            let mut body = self.transport.fetch_range(&self.url, range).await?;

            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                if written > expected {
                    return Err(FetchFailure::Overrun { expected });
                }

                writer.write_all(&chunk).await?;

                if let Some(counters) = progress {
                    counters.update_range(range_index, written);
                }
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if written < expected {
            return Err(FetchFailure::ShortRead {
                expected,
                actual: written,
            });
        }

        debug!(
            range_index,
            range = %range,
            bytes = written,
            staging = %staging.display(),
            "Range staged"
        );

        Ok(ChunkResult {
            range_index,
            range,
            staging,
            byte_count: written,
        })
    }
}

/// Create a uniquely named, empty staging file in `dir`.
///
/// Blocking; runs on the blocking pool. If the awaiting fetch is dropped
/// first, the returned [`TempPath`] drops with the task output and removes
/// the file.
fn create_staging_file(dir: &Path) -> io::Result<(File, TempPath)> {
    let staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)?;
    Ok(staged.into_parts())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{BoxFuture, ByteStream};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves ranges of an in-memory body, optionally misbehaving.
    pub struct MockTransport {
        pub body: Vec<u8>,
        pub truncate_by: usize,
        pub pad_by: usize,
        pub fail_with: Option<TransportError>,
        pub requests: AtomicUsize,
    }

    impl MockTransport {
        pub fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                truncate_by: 0,
                pad_by: 0,
                fail_with: None,
                requests: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for MockTransport {
        fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<u64, TransportError>> {
            Box::pin(async move { Ok(self.body.len() as u64) })
        }

        fn fetch_range<'a>(
            &'a self,
            _url: &'a str,
            range: ByteRange,
        ) -> BoxFuture<'a, Result<ByteStream, TransportError>> {
            Box::pin(async move {
                self.requests.fetch_add(1, Ordering::SeqCst);
                if let Some(err) = &self.fail_with {
                    return Err(err.clone());
                }
                let start = range.start() as usize;
                let end = start + range.len() as usize - self.truncate_by;
                let mut data = self.body[start..end].to_vec();
                data.extend(std::iter::repeat(b'!').take(self.pad_by));

                // split into two chunks to exercise the streaming loop
                let mid = data.len() / 2;
                let second = data.split_off(mid);
                let chunks = vec![Ok(Bytes::from(data)), Ok(Bytes::from(second))];
                Ok(futures::stream::iter(chunks).boxed())
            })
        }
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn fetcher(transport: MockTransport, dir: &Path) -> RangeFetcher {
        RangeFetcher::new(Arc::new(transport), "http://example.com/file", dir, 4)
    }

    #[tokio::test]
    async fn test_fetch_stages_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(MockTransport::new(b"ABCDEFGHIJ"), dir.path());

        let chunk = fetcher
            .fetch(1, ByteRange::inclusive(3, 5), None)
            .await
            .unwrap();

        assert_eq!(chunk.range_index(), 1);
        assert_eq!(chunk.byte_count(), 3);
        assert!(chunk.staging_path().starts_with(dir.path()));
        let name = chunk.staging_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(STAGING_PREFIX));
        assert!(name.ends_with(STAGING_SUFFIX));
        assert_eq!(std::fs::read(chunk.staging_path()).unwrap(), b"DEF");
    }

    #[tokio::test]
    async fn test_dropped_chunk_removes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(MockTransport::new(b"ABCDEFGHIJ"), dir.path());

        let chunk = fetcher
            .fetch(0, ByteRange::inclusive(0, 9), None)
            .await
            .unwrap();
        assert_eq!(staged_files(dir.path()), 1);

        drop(chunk);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_staging_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(MockTransport::new(b"ABCDEFGHIJ"), dir.path());

        let a = fetcher.fetch(0, ByteRange::inclusive(0, 4), None).await.unwrap();
        let b = fetcher.fetch(0, ByteRange::inclusive(0, 4), None).await.unwrap();
        assert_ne!(a.staging_path(), b.staging_path());
    }

    #[tokio::test]
    async fn test_short_read_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockTransport::new(b"ABCDEFGHIJ");
        transport.truncate_by = 2;
        let fetcher = fetcher(transport, dir.path());

        let err = fetcher
            .fetch(0, ByteRange::inclusive(0, 9), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchFailure::ShortRead {
                expected: 10,
                actual: 8
            }
        ));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_overrun_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockTransport::new(b"ABCDEFGHIJ");
        transport.pad_by = 3;
        let fetcher = fetcher(transport, dir.path());

        let err = fetcher
            .fetch(0, ByteRange::inclusive(0, 4), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchFailure::Overrun { expected: 5 }));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_transport_error_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut transport = MockTransport::new(b"ABCDEFGHIJ");
        transport.fail_with = Some(TransportError::Status {
            status: 416,
            url: "http://example.com/file".to_string(),
        });
        let fetcher = fetcher(transport, dir.path());

        let err = fetcher
            .fetch(0, ByteRange::inclusive(0, 4), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchFailure::Transport(TransportError::Status { status: 416, .. })
        ));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_range_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new(b""));
        let fetcher = RangeFetcher::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            "http://example.com/empty",
            dir.path(),
            4,
        );

        let chunk = fetcher.fetch(0, ByteRange::new(0, 0), None).await.unwrap();

        assert_eq!(chunk.byte_count(), 0);
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(chunk.staging_path()).unwrap(), b"");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_missing_staging_dir_is_staging_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new(b"ABCDEFGHIJ"));
        let fetcher = RangeFetcher::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            "http://example.com/file",
            dir.path().join("gone"),
            4,
        );

        let err = fetcher
            .fetch(0, ByteRange::inclusive(0, 9), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchFailure::Staging(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(MockTransport::new(b"ABCDEFGHIJ"), dir.path());
        let counters = ProgressCounters::new(2);

        let _chunk = fetcher
            .fetch(1, ByteRange::inclusive(4, 9), Some(&counters))
            .await
            .unwrap();

        assert_eq!(counters.total_bytes(), 6);
    }
}
