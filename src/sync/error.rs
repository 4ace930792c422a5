use std::path::PathBuf;

use thiserror::Error;

use crate::archive::CorruptArchive;
use crate::validate::MissingAssetError;

/// Errors from a single archive download attempt.
///
/// `is_retryable()` separates transient transport failures (connect/read
/// timeouts, disconnects, short bodies, 5xx) from responses that retrying
/// cannot fix, so the retry loop can abort early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error fetching {url} (bytes_so_far={bytes_received}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_received: u64,
    },

    #[error("Server did not report a content length for {url}")]
    SizeUnknown { url: String },

    #[error("Body length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    ///
    /// A missing content length is a server contract violation and is not
    /// retried. 4xx statuses other than 408/429 are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            DownloadError::Http { .. } => true,
            DownloadError::LengthMismatch { .. } => true,
            DownloadError::Io(_) => true,
            DownloadError::SizeUnknown { .. } => false,
            DownloadError::Cancelled => false,
        }
    }

    /// Record how far the body got before a transport error.
    pub(crate) fn with_bytes_received(mut self, received: u64) -> Self {
        if let DownloadError::Http { bytes_received, .. } = &mut self {
            *bytes_received = received;
        }
        self
    }
}

/// Terminal result of a failed sync. Every variant is raised before the
/// Local Store is modified, except `Store`, which reports a failed write.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Download failed after {attempts} attempts: {source}")]
    DownloadFailed {
        attempts: u32,
        #[source]
        source: DownloadError,
    },

    #[error("Server did not report the archive size")]
    SizeUnknown,

    #[error("Corrupt archive: {0}")]
    CorruptArchive(#[from] CorruptArchive),

    #[error(transparent)]
    MissingAsset(#[from] MissingAssetError),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Another sync is already running (lock: {})", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Local store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
