//! Backend contract for progress replication and reading sessions.

mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reading_core::model::{
    AchievementEvent, BookId, ProgressRecord, ReadingSession, SessionId, UserId,
};

use crate::error::RemoteError;

pub use http::{HttpProgressRemote, RemoteConfig};

/// Body of `POST /progress`.
///
/// `completed` and `is_completed` always carry the same derived value; both
/// names are accepted by deployed backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub user_id: UserId,
    pub entity_id: BookId,
    pub pages_read: u32,
    pub total_pages: u32,
    pub completed: bool,
    pub is_completed: bool,
    pub last_synced_at: DateTime<Utc>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(
        user_id: &UserId,
        book_id: &BookId,
        record: &ProgressRecord,
        now: DateTime<Utc>,
    ) -> Self {
        let completed = record.is_completed();
        Self {
            user_id: user_id.clone(),
            entity_id: book_id.clone(),
            pages_read: record.pages_read(),
            total_pages: record.total_pages(),
            completed,
            is_completed: completed,
            last_synced_at: now,
        }
    }
}

/// Response of `POST /progress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncOutcome {
    #[serde(default)]
    achievements: Option<Vec<AchievementEvent>>,
}

impl SyncOutcome {
    #[must_use]
    pub fn with_achievements(achievements: Vec<AchievementEvent>) -> Self {
        Self {
            achievements: Some(achievements),
        }
    }

    #[must_use]
    pub fn achievements(&self) -> &[AchievementEvent] {
        self.achievements.as_deref().unwrap_or_default()
    }
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub user_id: UserId,
    pub entity_id: BookId,
    pub pages_read: u32,
    pub total_pages: u32,
}

/// Remote progress backend.
///
/// Implementations map HTTP statuses with [`RemoteError::from_status`], except
/// that `active_session` reports a 404 as `Ok(None)`.
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    /// `POST /progress`. Safe to repeat with an identical payload.
    async fn sync_progress(&self, update: &ProgressUpdate) -> Result<SyncOutcome, RemoteError>;

    /// `POST /sessions`. A 409 is returned as `RemoteError::Conflict`.
    async fn create_session(&self, request: &NewSession) -> Result<ReadingSession, RemoteError>;

    /// `GET /sessions/active?entityId=`.
    async fn active_session(&self, book_id: &BookId)
    -> Result<Option<ReadingSession>, RemoteError>;

    /// `POST /sessions/{id}/end`.
    async fn end_session(&self, session_id: &SessionId) -> Result<(), RemoteError>;
}

/// Remote used when no backend is configured: every call reports a missing route,
/// which the engine treats as "local success, remote skipped".
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl ProgressRemote for OfflineRemote {
    async fn sync_progress(&self, _update: &ProgressUpdate) -> Result<SyncOutcome, RemoteError> {
        Err(RemoteError::NotFound)
    }

    async fn create_session(&self, _request: &NewSession) -> Result<ReadingSession, RemoteError> {
        Err(RemoteError::NotFound)
    }

    async fn active_session(
        &self,
        _book_id: &BookId,
    ) -> Result<Option<ReadingSession>, RemoteError> {
        Ok(None)
    }

    async fn end_session(&self, _session_id: &SessionId) -> Result<(), RemoteError> {
        Err(RemoteError::NotFound)
    }
}
