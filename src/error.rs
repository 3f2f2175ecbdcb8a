//! Domain error type shared by the storage, upload and download paths.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum LibrarianError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("size mismatch: declared {declared}, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    #[error("not found")]
    NotFound,

    #[error("storage I/O error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("object store timed out after {0}s")]
    ObjectStoreTimeout(u64),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("refusing maintenance: {0}")]
    UnsafeMaintenance(String),

    #[error("catalog error: {0:#}")]
    Catalog(#[from] anyhow::Error),
}

pub type LibrarianResult<T> = std::result::Result<T, LibrarianError>;

impl LibrarianError {
    /// Status code sent back over the upload protocol.
    pub fn upload_status(&self) -> u16 {
        match self {
            LibrarianError::Protocol(_)
            | LibrarianError::DigestMismatch { .. }
            | LibrarianError::SizeMismatch { .. } => 400,
            _ => 503,
        }
    }

    /// Whether the swift feeder should try the same object again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LibrarianError::ObjectStoreTimeout(_) | LibrarianError::ObjectStore(_)
        )
    }
}

impl IntoResponse for LibrarianError {
    fn into_response(self) -> Response {
        match self {
            LibrarianError::NotFound => StatusCode::NOT_FOUND.into_response(),
            LibrarianError::UpstreamUnavailable(reason) => {
                warn!("Upstream unavailable: {}", reason);
                StatusCode::BAD_GATEWAY.into_response()
            }
            other => {
                error!("Request failed: {}", other);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
