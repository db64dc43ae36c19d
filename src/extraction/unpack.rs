use super::ProgressSender;
use super::errors::ExtractionError;
use crate::prelude::*;
use async_compression::tokio::bufread::GzipDecoder;
use futures::StreamExt;
use host_shared::events::{ProgressEvent, ProgressKind, ProgressStatus};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

/// A progress event is emitted every this many processed entries.
pub(super) const PROGRESS_EVERY_ENTRIES: usize = 10;

const ZIP_MAGIC: [&[u8]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ArchiveFormat {
    Zip,
    TarGz,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct UnpackStats {
    pub entries: usize,
    pub skipped: usize,
}

/// Detect the archive format from its leading bytes, whatever its extension.
pub(super) async fn detect_format(archive: &Path) -> Result<ArchiveFormat, ExtractionError> {
    let mut file = tokio::fs::File::open(archive).await?;
    let mut header = Vec::with_capacity(4);
    (&mut file).take(4).read_to_end(&mut header).await?;

    if ZIP_MAGIC.iter().any(|magic| header.starts_with(magic)) {
        Ok(ArchiveFormat::Zip)
    } else if header.starts_with(GZIP_MAGIC) {
        Ok(ArchiveFormat::TarGz)
    } else {
        Err(ExtractionError::UnsupportedFormat(format!(
            "{} is neither a zip nor a gzip-compressed tar archive",
            archive.display()
        )))
    }
}

fn send_progress(progress: &ProgressSender, percentage: f64, message: String) {
    let _ = progress.send(
        ProgressEvent::new(ProgressKind::Extraction, ProgressStatus::Progress, message)
            .with_percentage(percentage),
    );
}

/// Path of `entry` relative to the output directory, `None` when it would escape it.
fn contained_path(entry: &Path) -> Option<PathBuf> {
    let mut contained = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => contained.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(contained)
}

/// Blocking: run it on the blocking pool.
pub(super) fn unpack_zip(
    archive: &Path,
    destination: &Path,
    progress: &ProgressSender,
) -> Result<UnpackStats, ExtractionError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(io::BufReader::new(file))?;
    let total = zip.len();
    let mut stats = UnpackStats::default();

    for index in 0..total {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping archive entry outside of the output folder: {}", entry.name());
            stats.skipped += 1;
            continue;
        };
        let target = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut output = std::fs::File::create(&target)?;
            io::copy(&mut entry, &mut output)?;
        }
        stats.entries += 1;

        let processed = index + 1;
        if processed % PROGRESS_EVERY_ENTRIES == 0 {
            send_progress(
                progress,
                processed as f64 / total as f64 * 100.0,
                format!("Extracted {processed} of {total} entries"),
            );
        }
    }

    Ok(stats)
}

/// Counts the bytes read from the inner reader, shared with whoever reports progress.
struct CountingReader<R> {
    inner: R,
    consumed: Arc<AtomicU64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.consumed
                .fetch_add((buf.filled().len() - before) as u64, Ordering::Relaxed);
        }
        poll
    }
}

fn decompression_error(error: io::Error) -> ExtractionError {
    ExtractionError::Decompression(error.to_string())
}

/// The entry count of a tar stream is unknown up front: progress follows the compressed bytes.
pub(super) async fn unpack_tar_gz(
    archive: &Path,
    archive_size: u64,
    destination: &Path,
    progress: &ProgressSender,
) -> Result<UnpackStats, ExtractionError> {
    let consumed = Arc::new(AtomicU64::new(0));
    let reader = CountingReader {
        inner: tokio::fs::File::open(archive).await?,
        consumed: consumed.clone(),
    };
    let mut tar = tokio_tar::Archive::new(GzipDecoder::new(BufReader::new(reader)));
    let mut entries = tar.entries().map_err(decompression_error)?;
    let mut stats = UnpackStats::default();
    let mut processed = 0usize;

    while let Some(entry) = entries.next().await {
        let mut entry = entry.map_err(decompression_error)?;
        processed += 1;

        let entry_path = entry.path().map_err(decompression_error)?.into_owned();
        if contained_path(&entry_path).is_none() {
            warn!(
                "Skipping archive entry outside of the output folder: {}",
                entry_path.display()
            );
            stats.skipped += 1;
        } else if entry.unpack_in(destination).await? {
            stats.entries += 1;
        } else {
            stats.skipped += 1;
        }

        if processed % PROGRESS_EVERY_ENTRIES == 0 && archive_size > 0 {
            let read = consumed.load(Ordering::Relaxed);
            send_progress(
                progress,
                read as f64 / archive_size as f64 * 100.0,
                format!("Extracted {processed} entries"),
            );
        }
    }

    Ok(stats)
}
