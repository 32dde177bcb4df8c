use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by backends and the path resolver.
///
/// Callers get these unmodified: nothing in this crate retries, falls back, or
/// returns partial results.
#[derive(Debug, Error)]
pub enum InsDbError {
    #[error("no object with UUID {0}")]
    NotFound(Uuid),

    #[error("invalid path \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("no entry '{0}' here")]
    NotAnEntity(String),

    #[error("no local copy available for {0}")]
    NoLocalCopy(Uuid),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid snapshot: {0}")]
    Snapshot(String),
}

impl InsDbError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn read_only(operation: &str) -> Self {
        Self::PermissionDenied(format!("{operation}: this database is read-only"))
    }
}

pub type Result<T> = std::result::Result<T, InsDbError>;
