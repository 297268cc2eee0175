use tokio::sync::watch;

use reading_core::model::{
    BookId, ChallengeGoal, ChallengeProgress, ProgressError, ProgressMap, ProgressRecord,
    SessionState, Snapshot, UserId, parse_page_count,
};
use storage::UserData;

use crate::error::TrackerError;
use crate::sync::{AuthAlert, SyncEngine, SyncEngineBuilder};

/// Entry point for UI code: validates input, keeps the in-memory view, and feeds
/// every change to the sync engine as a snapshot.
pub struct ReadingTracker {
    data: UserData,
    engine: SyncEngine,
}

impl ReadingTracker {
    /// Load (and migrate) the user's local data, then start the engine.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if local data cannot be read.
    pub async fn open(engine: SyncEngineBuilder) -> Result<Self, TrackerError> {
        let data = engine.store().load().await?;
        Ok(Self {
            data,
            engine: engine.start(),
        })
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        self.engine.user()
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressMap {
        &self.data.progress
    }

    #[must_use]
    pub fn record(&self, book_id: &BookId) -> Option<ProgressRecord> {
        self.data.progress.get(book_id).copied()
    }

    #[must_use]
    pub fn current_book(&self) -> Option<&BookId> {
        self.data.current_book.as_ref()
    }

    #[must_use]
    pub fn challenge_goal(&self) -> Option<ChallengeGoal> {
        self.data.challenge_goal
    }

    #[must_use]
    pub fn challenge_progress(&self) -> ChallengeProgress {
        ChallengeProgress {
            completed: u32::try_from(self.data.progress.completed_count()).unwrap_or(u32::MAX),
            target: self.data.challenge_goal.map(|goal| goal.target_books()),
        }
    }

    /// Record progress for a book.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Progress` for invalid page counts (nothing is queued),
    /// or `TrackerError::Engine` after logout.
    pub fn update_progress(
        &mut self,
        book_id: BookId,
        pages_read: u32,
        total_pages: u32,
    ) -> Result<ProgressRecord, TrackerError> {
        let record = ProgressRecord::new(pages_read, total_pages)?;
        let next = UserData {
            progress: self.data.progress.with_record(book_id, record),
            ..self.data.clone()
        };
        self.commit(next)?;
        Ok(record)
    }

    /// Like [`update_progress`](Self::update_progress) for raw text input.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Progress` if either value is not a whole number.
    pub fn update_progress_input(
        &mut self,
        book_id: BookId,
        pages_read: &str,
        total_pages: &str,
    ) -> Result<ProgressRecord, TrackerError> {
        let pages_read = parse_page_count(pages_read)?;
        let total_pages = parse_page_count(total_pages)?;
        self.update_progress(book_id, pages_read, total_pages)
    }

    /// Mark every page of a book as read.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::TotalUnknown` when the book has no known length.
    pub fn mark_finished(&mut self, book_id: BookId) -> Result<ProgressRecord, TrackerError> {
        let total = self
            .record(&book_id)
            .map(|record| record.total_pages())
            .filter(|total| *total > 0)
            .ok_or_else(|| ProgressError::TotalUnknown {
                book_id: book_id.to_string(),
            })?;
        self.update_progress(book_id, total, total)
    }

    /// Make `book_id` the currently-reading book and request a session for it.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Engine` after logout.
    pub fn select_book(&mut self, book_id: BookId) -> Result<(), TrackerError> {
        let record = self.record(&book_id).unwrap_or_default();
        let next = UserData {
            current_book: Some(book_id.clone()),
            ..self.data.clone()
        };
        self.commit(next)?;
        if !record.is_completed() {
            self.engine.begin_session(book_id, record)?;
        }
        Ok(())
    }

    /// Stop reading the current book; its session is ended best-effort.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Engine` after logout.
    pub fn clear_current_book(&mut self) -> Result<Option<BookId>, TrackerError> {
        let Some(previous) = self.data.current_book.clone() else {
            return Ok(None);
        };
        let next = UserData {
            current_book: None,
            ..self.data.clone()
        };
        self.commit(next)?;
        self.engine.end_session(previous.clone())?;
        Ok(Some(previous))
    }

    /// Set the yearly challenge goal.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::ChallengeGoal` for out-of-range targets; these are
    /// meant to be shown to the user.
    pub fn set_challenge_goal(&mut self, target_books: u32) -> Result<ChallengeGoal, TrackerError> {
        let goal = ChallengeGoal::new(target_books)?;
        let next = UserData {
            challenge_goal: Some(goal),
            ..self.data.clone()
        };
        self.commit(next)?;
        Ok(goal)
    }

    #[must_use]
    pub fn session_state(&self, book_id: &BookId) -> SessionState {
        self.engine.session_state(book_id)
    }

    #[must_use]
    pub fn authorization_alerts(&self) -> watch::Receiver<Option<AuthAlert>> {
        self.engine.authorization_alerts()
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Wait until every change so far is persisted locally.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Engine` if the engine has stopped.
    pub async fn flush(&self) -> Result<(), TrackerError> {
        Ok(self.engine.flush().await?)
    }

    /// Wait until every change so far is persisted and all remote work has resolved.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Engine` if the engine has stopped.
    pub async fn settle(&self) -> Result<(), TrackerError> {
        Ok(self.engine.settle().await?)
    }

    /// Drain outstanding work and tear the engine down. In-memory state is dropped.
    pub async fn logout(self) {
        self.engine.shutdown().await;
    }

    fn commit(&mut self, next: UserData) -> Result<(), TrackerError> {
        let snapshot = Snapshot::new(
            next.progress.clone(),
            next.current_book.clone(),
            next.challenge_goal,
        );
        self.engine.enqueue(snapshot)?;
        self.data = next;
        Ok(())
    }
}
