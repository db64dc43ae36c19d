//! Archive extraction: decompress an uploaded export into a scratch folder, then find the folder
//! holding the actual data inside it.

mod errors;
mod locate;
mod unpack;


pub use errors::ExtractionError;

use crate::config::ExtractionConfig;
use crate::helpers::{create_scratch_folder, format_memory};
use crate::outcome::Outcome;
use crate::prelude::*;
use crate::telemetry::{Metadata, OperationCategory, OperationId, OperationResult, OperationTracker};
use host_shared::events::{ProgressEvent, ProgressKind, ProgressStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use unpack::{ArchiveFormat, UnpackStats};

/// Channel extraction progress is pushed to. A closed receiver is ignored.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStructure {
    pub working_folder: PathBuf,
    pub anchor_found: bool,
    pub has_media_folder: bool,
    pub has_activity_folder: bool,
}

pub struct ArchiveExtractor {
    settings: ExtractionConfig,
    tracker: Arc<OperationTracker>,
}

fn emit(progress: &ProgressSender, event: ProgressEvent) {
    let _ = progress.send(event);
}

impl ArchiveExtractor {
    pub fn new(settings: ExtractionConfig, tracker: Arc<OperationTracker>) -> Self {
        Self { settings, tracker }
    }

    fn start_step(&self, parent: Option<&OperationId>, name: &str, metadata: Metadata) -> OperationId {
        match parent {
            Some(parent) => self
                .tracker
                .start_child_operation(parent, name, metadata)
                .into_value(),
            None => self
                .tracker
                .start_operation(name, OperationCategory::Operation, metadata),
        }
    }

    /// Extract `archive_path` into `output_path` (a fresh scratch folder when `None`) and locate
    /// its working folder.
    ///
    /// Always ends with a terminal progress event: `complete` on success, `error` otherwise.
    pub async fn extract(
        &self,
        archive_path: &Path,
        output_path: Option<&Path>,
        progress: &ProgressSender,
        parent: Option<&OperationId>,
    ) -> Result<Outcome<ArchiveStructure>, ExtractionError> {
        let result = self.extract_inner(archive_path, output_path, progress, parent).await;

        match &result {
            Ok(outcome) => {
                let structure = outcome.value();
                emit(
                    progress,
                    ProgressEvent::new(
                        ProgressKind::Extraction,
                        ProgressStatus::Complete,
                        "Extraction complete",
                    )
                    .with_percentage(100.0)
                    .with_output_folder(&structure.working_folder, structure.anchor_found),
                );
            }
            Err(e) => {
                error!("Extraction of {} failed: {e}", archive_path.display());
                emit(
                    progress,
                    ProgressEvent::new(ProgressKind::Extraction, ProgressStatus::Error, e.to_string()),
                );
            }
        }

        result
    }

    async fn extract_inner(
        &self,
        archive_path: &Path,
        output_path: Option<&Path>,
        progress: &ProgressSender,
        parent: Option<&OperationId>,
    ) -> Result<Outcome<ArchiveStructure>, ExtractionError> {
        let archive_size = match tokio::fs::metadata(archive_path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => {
                return Err(ExtractionError::ArchiveNotFound {
                    path: archive_path.to_path_buf(),
                });
            }
        };
        let archive_name = archive_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive_path.display().to_string());
        emit(
            progress,
            ProgressEvent::new(
                ProgressKind::Extraction,
                ProgressStatus::Starting,
                format!(
                    "Extracting {archive_name} ({})",
                    format_memory(archive_size as f64, None)
                ),
            )
            .with_percentage(0.0),
        );

        let format = unpack::detect_format(archive_path).await?;
        let destination = match output_path {
            Some(path) => {
                tokio::fs::create_dir_all(path)
                    .await
                    .map_err(|source| ExtractionError::CreateOutputDir {
                        path: path.to_path_buf(),
                        source,
                    })?;
                path.to_path_buf()
            }
            None => create_scratch_folder()
                .await
                .map_err(|source| ExtractionError::CreateOutputDir {
                    path: std::env::temp_dir(),
                    source,
                })?,
        };
        debug!(
            "Extracting {} as {format:?} into {}",
            archive_path.display(),
            destination.display()
        );

        let decompress_id = self.start_step(
            parent,
            "decompress",
            Metadata::from([
                ("archive".to_owned(), archive_name.into()),
                ("archiveBytes".to_owned(), archive_size.into()),
            ]),
        );
        let stats = self
            .decompress(format, archive_path, archive_size, &destination, progress)
            .await;
        let stats = match stats {
            Ok(stats) => {
                self.tracker.end_operation(
                    &decompress_id,
                    OperationResult::success()
                        .with("entries", stats.entries)
                        .with("skipped", stats.skipped),
                );
                stats
            }
            Err(e) => {
                self.tracker
                    .end_operation(&decompress_id, OperationResult::failure(&e));
                return Err(e);
            }
        };
        info!(
            "Extracted {} entries into {}",
            stats.entries,
            destination.display()
        );

        let locate_id = self.start_step(parent, "locate-anchor", Metadata::new());
        let settings = self.settings.clone();
        let root = destination.clone();
        let outcome = tokio::task::spawn_blocking(move || locate::locate_structure(&root, &settings))
            .await
            .map_err(|e| ExtractionError::Io(std::io::Error::other(e)))?;
        self.tracker.end_operation(
            &locate_id,
            OperationResult::success().with("anchorFound", outcome.value().anchor_found),
        );

        Ok(outcome)
    }

    async fn decompress(
        &self,
        format: ArchiveFormat,
        archive_path: &Path,
        archive_size: u64,
        destination: &Path,
        progress: &ProgressSender,
    ) -> Result<UnpackStats, ExtractionError> {
        match format {
            ArchiveFormat::Zip => {
                let archive_path = archive_path.to_path_buf();
                let destination = destination.to_path_buf();
                let progress = progress.clone();
                tokio::task::spawn_blocking(move || {
                    unpack::unpack_zip(&archive_path, &destination, &progress)
                })
                .await
                .map_err(|e| ExtractionError::Decompression(e.to_string()))?
            }
            ArchiveFormat::TarGz => {
                unpack::unpack_tar_gz(archive_path, archive_size, destination, progress).await
            }
        }
    }
}
