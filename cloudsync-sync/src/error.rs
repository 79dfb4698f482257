//! Error types for cloudsync-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The store answered with a status the engine does not handle.
    #[error("remote store returned HTTP {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The store answered `success: false` without declaring its own state.
    #[error("remote store rejected request: {0}")]
    Remote(String),

    /// The response body was not the JSON the engine expects.
    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON error in a host document.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The host collaborator could not be read or written.
    #[error("host error: {0}")]
    Host(String),

    /// Bootstrap found nothing to synchronize.
    #[error("no trackable variables found (prefix: {prefix:?})")]
    NoTrackedVariables { prefix: String },

    /// A blocking request task was cancelled or panicked.
    #[error("request task failed: {0}")]
    Join(String),
}

impl SyncError {
    /// Transport-class failures are recovered by the next periodic tick.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. }
                | SyncError::Status { .. }
                | SyncError::Remote(_)
                | SyncError::Decode { .. }
                | SyncError::Join(_)
        )
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
