use std::io;
use std::path::PathBuf;

/// Fatal extraction failures. None of them is retried.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Archive not found: {}", path.display())]
    ArchiveNotFound { path: PathBuf },

    #[error("Failed to create output directory {}: {source}", path.display())]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decompress archive: {0}")]
    Decompression(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<zip::result::ZipError> for ExtractionError {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::Io(error) => ExtractionError::Io(error),
            error => ExtractionError::Decompression(error.to_string()),
        }
    }
}
