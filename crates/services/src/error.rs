//! Shared error types for the services crate.

use reqwest::StatusCode;
use thiserror::Error;

use reading_core::model::{ChallengeGoalError, ProgressError};
use storage::StorageError;

/// Errors returned by a `ProgressRemote`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    #[error("remote rejected credentials ({0})")]
    Unauthorized(StatusCode),
    #[error("remote route not found")]
    NotFound,
    #[error("a session already exists for this book")]
    Conflict,
    #[error("remote request failed with status {0}")]
    HttpStatus(StatusCode),
    #[error("invalid remote configuration: {0}")]
    Config(String),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl RemoteError {
    /// Classify a non-success status.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(status),
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::Conflict,
            other => Self::HttpStatus(other),
        }
    }
}

/// Errors emitted by the `SyncEngine` handle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("sync engine has stopped")]
    Stopped,
}

/// Errors emitted by `ReadingTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    ChallengeGoal(#[from] ChallengeGoalError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
