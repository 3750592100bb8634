//! Failure taxonomy for a single download submission.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::StoreError;

/// Every way a `POST /download` request can end without a stored record.
///
/// None of these are retried; the client resubmits.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("URL is required")]
    MissingParameter,
    #[error("Invalid YouTube URL")]
    InvalidUrl,
    #[error("Failed to get video info: {0}")]
    ExtractionFailed(String),
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("No files found after download")]
    NoFileProduced,
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("{action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("background task failed: {0}")]
    Worker(String),
}

impl DownloadError {
    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether the request itself was at fault (HTTP 400) rather than the
    /// server or the engine (HTTP 500).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingParameter | Self::InvalidUrl)
    }
}
