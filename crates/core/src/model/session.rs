use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BookId, SessionId};

/// A server-tracked reading period for one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    pub id: SessionId,
    #[serde(rename = "entityId")]
    pub book_id: BookId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionTransitionError {
    #[error("a session request is already pending")]
    AlreadyRequesting,
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no session request is pending")]
    NotRequesting,
}

/// Local view of the session lifecycle for one book.
///
/// ```text
/// NoSession ──begin_request──▶ Requesting ──activate──▶ Active ──end──▶ Ended
///     ▲                            │
///     └────────request_failed──────┘
/// ```
///
/// `Ended` accepts a new `begin_request`, the same as `NoSession`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NoSession,
    Requesting,
    Active(ReadingSession),
    Ended,
}

impl SessionState {
    /// `NoSession | Ended → Requesting`.
    ///
    /// # Errors
    ///
    /// Fails if a request is pending or a session is already active.
    pub fn begin_request(&mut self) -> Result<(), SessionTransitionError> {
        match self {
            Self::NoSession | Self::Ended => {
                *self = Self::Requesting;
                Ok(())
            }
            Self::Requesting => Err(SessionTransitionError::AlreadyRequesting),
            Self::Active(_) => Err(SessionTransitionError::AlreadyActive),
        }
    }

    /// `Requesting → Active`.
    ///
    /// # Errors
    ///
    /// Fails unless a request is pending, e.g. when the book was put down while the
    /// request was in flight. The caller owns the returned-but-unadopted session then.
    pub fn activate(&mut self, session: ReadingSession) -> Result<(), SessionTransitionError> {
        if !matches!(self, Self::Requesting) {
            return Err(SessionTransitionError::NotRequesting);
        }
        *self = Self::Active(session);
        Ok(())
    }

    /// `Requesting → NoSession`. Other states are left alone.
    pub fn request_failed(&mut self) {
        if matches!(self, Self::Requesting) {
            *self = Self::NoSession;
        }
    }

    /// Move to `Ended`, returning the session that should be closed remotely.
    ///
    /// Ending while a request is pending also lands in `Ended`, so the late
    /// response is rejected by `activate`.
    pub fn end(&mut self) -> Option<ReadingSession> {
        match std::mem::replace(self, Self::Ended) {
            Self::Active(session) => Some(session),
            Self::Requesting => None,
            previous @ (Self::NoSession | Self::Ended) => {
                *self = previous;
                None
            }
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&ReadingSession> {
        match self {
            Self::Active(session) => Some(session),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}
