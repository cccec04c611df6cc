//! Merger for staged chunks.
//!
//! Concatenates staging files into the destination strictly in range index
//! order, deleting each staging file once its bytes are in the destination.
//! On any failure, or if the merge future is dropped part way, the partial
//! destination is removed; staging files not yet consumed are removed when
//! their [`ChunkResult`]s drop.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::fetch::ChunkResult;

/// Removes the destination on drop unless the merge was kept.
struct PartialDestination {
    path: PathBuf,
    keep: bool,
}

impl PartialDestination {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialDestination {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(destination = %self.path.display(), "Removed partial destination"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                destination = %self.path.display(),
                error = %e,
                "Failed to remove partial destination"
            ),
        }
    }
}

/// Merge `chunks` (ordered by range index) into `destination`.
///
/// An existing destination is replaced. The parent directory must already
/// exist. Fails with [`DownloadError::MergeLength`] if the merged length is
/// not `expected_len`.
pub async fn merge_chunks(
    chunks: Vec<ChunkResult>,
    destination: &Path,
    expected_len: u64,
    buffer_size: usize,
) -> Result<u64, DownloadError> {
    let partial = PartialDestination::new(destination);

    let written = write_destination(chunks, destination, buffer_size)
        .await
        .map_err(|source| DownloadError::MergeIo {
            path: destination.to_path_buf(),
            source,
        })?;

    if written != expected_len {
        return Err(DownloadError::MergeLength {
            path: destination.to_path_buf(),
            expected: expected_len,
            actual: written,
        });
    }

    partial.keep();
    debug!(
        destination = %destination.display(),
        bytes = written,
        "Merge complete"
    );
    Ok(written)
}

async fn write_destination(
    chunks: Vec<ChunkResult>,
    destination: &Path,
    buffer_size: usize,
) -> io::Result<u64> {
    match fs::remove_file(destination).await {
        Ok(()) => debug!(destination = %destination.display(), "Replacing existing destination"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .await?;
    let mut writer = BufWriter::with_capacity(buffer_size, file);
    let mut written = 0u64;

    for chunk in chunks {
        let index = chunk.range_index();
        let staging = chunk.into_staging();

        let mut reader = BufReader::with_capacity(buffer_size, File::open(&staging).await?);
        let copied = tokio::io::copy_buf(&mut reader, &mut writer).await?;
        drop(reader);
        written += copied;

        staging.close()?;
        debug!(range_index = index, bytes = copied, "Chunk merged");
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}
