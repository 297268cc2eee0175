use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use reading_core::model::{BookId, ProgressRecord, ReadingSession, SessionState, UserId};

use crate::error::RemoteError;
use crate::remote::{NewSession, ProgressRemote};

/// Tracks the reading-session lifecycle of every book for one user.
pub struct SessionCoordinator {
    user: UserId,
    remote: Arc<dyn ProgressRemote>,
    states: Mutex<HashMap<BookId, SessionState>>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(user: UserId, remote: Arc<dyn ProgressRemote>) -> Self {
        Self {
            user,
            remote,
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn state(&self, book_id: &BookId) -> SessionState {
        self.with_state(book_id, |state| state.clone())
    }

    /// True while a session is requested or active for `book_id`.
    #[must_use]
    pub fn is_open(&self, book_id: &BookId) -> bool {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .get(book_id)
            .is_some_and(|state| matches!(state, SessionState::Requesting | SessionState::Active(_)))
    }

    /// Start (or adopt) a session unless one is pending or active.
    ///
    /// Returns `Ok(true)` when this call moved the book to `Active`.
    ///
    /// # Errors
    ///
    /// Returns the `RemoteError` that prevented a session from being resolved; the
    /// book is back in `NoSession` by then.
    pub async fn begin(
        &self,
        book_id: &BookId,
        record: ProgressRecord,
    ) -> Result<bool, RemoteError> {
        if self.with_state(book_id, SessionState::begin_request).is_err() {
            return Ok(false);
        }

        let session = match self.resolve(book_id, record).await {
            Ok(session) => session,
            Err(err) => {
                self.with_state(book_id, SessionState::request_failed);
                return Err(err);
            }
        };

        let adopted = self.with_state(book_id, |state| state.activate(session.clone()));
        if adopted.is_err() {
            debug!(book = %book_id, session = %session.id, "book put down while session was requested");
            if let Err(err) = self.remote.end_session(&session.id).await {
                debug!(session = %session.id, error = %err, "closing orphaned session failed");
            }
            return Ok(false);
        }

        info!(book = %book_id, session = %session.id, "reading session active");
        Ok(true)
    }

    /// Look for an active session first; create one otherwise, adopting the
    /// existing session when creation reports a conflict.
    async fn resolve(
        &self,
        book_id: &BookId,
        record: ProgressRecord,
    ) -> Result<ReadingSession, RemoteError> {
        if let Some(existing) = self.remote.active_session(book_id).await? {
            return Ok(existing);
        }

        let request = NewSession {
            user_id: self.user.clone(),
            entity_id: book_id.clone(),
            pages_read: record.pages_read(),
            total_pages: record.total_pages(),
        };
        match self.remote.create_session(&request).await {
            Ok(session) => Ok(session),
            Err(RemoteError::Conflict) => {
                debug!(book = %book_id, "session already exists; adopting it");
                self.remote
                    .active_session(book_id)
                    .await?
                    .ok_or(RemoteError::NotFound)
            }
            Err(err) => Err(err),
        }
    }

    /// Move the book to `Ended` and close its session remotely, if it had one.
    ///
    /// The local transition happens before the remote call and stands even if it fails.
    ///
    /// # Errors
    ///
    /// Returns the `RemoteError` from the end call.
    pub async fn end(&self, book_id: &BookId) -> Result<(), RemoteError> {
        let Some(session) = self.with_state(book_id, SessionState::end) else {
            return Ok(());
        };
        info!(book = %book_id, session = %session.id, "ending reading session");
        self.remote.end_session(&session.id).await
    }

    fn with_state<R>(&self, book_id: &BookId, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        f(states.entry(book_id.clone()).or_default())
    }
}
