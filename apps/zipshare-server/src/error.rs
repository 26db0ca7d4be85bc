//! Error types for the Zipshare server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors raised across the upload, archive and package pipeline
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unknown upload: {0}")]
    UnknownUpload(String),

    #[error("Missing chunk {index} of {path}")]
    MissingChunk { path: String, index: u32 },

    #[error("Failed to create archive: {0}")]
    ArchiveCreateFailed(#[source] std::io::Error),

    #[error("Failed to add archive entry {path}: {source}")]
    ArchiveEntryFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to close archive: {0}")]
    ArchiveCloseFailed(#[source] std::io::Error),

    #[error("Finalize already in progress for this upload")]
    FinalizeInProgress,

    #[error("Upload already finalized")]
    AlreadyFinalized,

    #[error("Package not found")]
    NotFound,

    #[error("Package expired")]
    Expired,

    #[error("Storage error: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// True for the outcomes surfaced externally as "gone"
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired)
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPath(_)
            | Self::InvalidManifest(_)
            | Self::InvalidChunk(_)
            | Self::InvalidToken => StatusCode::BAD_REQUEST,
            Self::UnknownUpload(_) => StatusCode::NOT_FOUND,
            Self::MissingChunk { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::FinalizeInProgress | Self::AlreadyFinalized => StatusCode::CONFLICT,
            Self::NotFound | Self::Expired => StatusCode::NOT_FOUND,
            Self::ArchiveCreateFailed(_)
            | Self::ArchiveEntryFailed { .. }
            | Self::ArchiveCloseFailed(_)
            | Self::StorageIo(_)
            | Self::Database(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::InvalidManifest(_) => "INVALID_MANIFEST",
            Self::InvalidChunk(_) => "INVALID_CHUNK",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::UnknownUpload(_) => "UNKNOWN_UPLOAD",
            Self::MissingChunk { .. } => "MISSING_CHUNK",
            Self::ArchiveCreateFailed(_) => "ARCHIVE_CREATE_FAILED",
            Self::ArchiveEntryFailed { .. } => "ARCHIVE_ENTRY_FAILED",
            Self::ArchiveCloseFailed(_) => "ARCHIVE_CLOSE_FAILED",
            Self::FinalizeInProgress => "FINALIZE_IN_PROGRESS",
            Self::AlreadyFinalized => "ALREADY_FINALIZED",
            Self::NotFound | Self::Expired => "GONE",
            Self::StorageIo(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to the client
    fn public_message(&self) -> String {
        match self {
            Self::NotFound | Self::Expired => "Package not found or expired".to_string(),
            Self::StorageIo(_) => "Storage error".to_string(),
            Self::Database(_) => "Database error".to_string(),
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else if self.is_gone() {
            // Kept distinct in logs, collapsed on the wire
            tracing::debug!(reason = %self, "Package unavailable");
        }

        let body = Json(ErrorResponse {
            error: self.public_message(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gone_outcomes_are_indistinguishable() {
        let not_found = TransferError::NotFound;
        let expired = TransferError::Expired;

        assert_eq!(not_found.status_code(), expired.status_code());
        assert_eq!(not_found.code(), expired.code());
        assert_eq!(not_found.public_message(), expired.public_message());
        assert_ne!(not_found.to_string(), expired.to_string());
    }

    #[test]
    fn test_missing_chunk_message_names_path_and_index() {
        let err = TransferError::MissingChunk {
            path: "a/b.txt".to_string(),
            index: 3,
        };
        assert_eq!(err.to_string(), "Missing chunk 3 of a/b.txt");
        assert_eq!(err.public_message(), "Missing chunk 3 of a/b.txt");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
