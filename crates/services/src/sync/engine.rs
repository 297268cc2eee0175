use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use reading_core::Clock;
use reading_core::model::{BookId, DedupKey, ProgressRecord, SessionState, Snapshot, UserId};
use storage::UserDataStore;

use super::cooldown::CooldownTracker;
use super::in_flight::{InFlightSet, Reservation};
use super::sessions::SessionCoordinator;
use super::target::select_target;
use crate::achievements::AchievementDispatcher;
use crate::error::{EngineError, RemoteError};
use crate::remote::{ProgressRemote, ProgressUpdate};

/// Tuning knobs for a [`SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long an identical remote write is suppressed after it started.
    pub cooldown: Duration,
    /// Delay between reserving a book for replication and sending the request.
    /// Snapshots drained meanwhile replace the payload instead of adding calls.
    pub coalesce_delay: Duration,
}

impl EngineConfig {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);
    pub const DEFAULT_COALESCE_DELAY: Duration = Duration::from_millis(1500);

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_coalesce_delay(mut self, delay: Duration) -> Self {
        self.coalesce_delay = delay;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown: Self::DEFAULT_COOLDOWN,
            coalesce_delay: Self::DEFAULT_COALESCE_DELAY,
        }
    }
}

/// Raised when the backend rejects the user's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAlert {
    pub operation: &'static str,
    pub status: StatusCode,
}

enum Command {
    Drain(Snapshot),
    BeginSession {
        book_id: BookId,
        record: ProgressRecord,
    },
    EndSession {
        book_id: BookId,
    },
    Flush(oneshot::Sender<()>),
    Settle(oneshot::Sender<()>),
}

/// Configures and starts a [`SyncEngine`].
pub struct SyncEngineBuilder {
    store: UserDataStore,
    remote: Arc<dyn ProgressRemote>,
    clock: Clock,
    config: EngineConfig,
    achievements: AchievementDispatcher,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_achievements(mut self, achievements: AchievementDispatcher) -> Self {
        self.achievements = achievements;
        self
    }

    #[must_use]
    pub fn store(&self) -> &UserDataStore {
        &self.store
    }

    /// Spawn the drain task. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(self) -> SyncEngine {
        let user = self.store.user().clone();
        let (auth_tx, auth_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            sessions: SessionCoordinator::new(user.clone(), Arc::clone(&self.remote)),
            user,
            clock: self.clock,
            store: self.store,
            remote: self.remote,
            achievements: self.achievements,
            cooldown: Mutex::new(CooldownTracker::new(self.config.cooldown)),
            in_flight: Mutex::new(InFlightSet::new()),
            coalesce_delay: self.config.coalesce_delay,
            queued: AtomicUsize::new(0),
            auth_alerts: auth_tx,
        });
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(Arc::clone(&shared), rx));
        info!(user = %shared.user, "sync engine started");
        SyncEngine {
            commands,
            worker,
            shared,
            auth_rx,
        }
    }
}

/// Per-user progress replication engine.
///
/// Snapshots are handed to a single drain task over an unbounded channel and
/// processed strictly in order: each is persisted locally, then at most one of its
/// books is replicated on a background task. A book with a pending or running
/// request is never sent twice concurrently.
pub struct SyncEngine {
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
    shared: Arc<Shared>,
    auth_rx: watch::Receiver<Option<AuthAlert>>,
}

impl SyncEngine {
    #[must_use]
    pub fn builder(store: UserDataStore, remote: Arc<dyn ProgressRemote>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            store,
            remote,
            clock: Clock::default_clock(),
            config: EngineConfig::default(),
            achievements: AchievementDispatcher::disabled(),
        }
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.shared.user
    }

    /// Append a snapshot. Never blocks and never drops.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Stopped` once the engine has shut down.
    pub fn enqueue(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        self.shared.queued.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Drain(snapshot)).inspect_err(|_| {
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
        })
    }

    /// Request a reading session for `book_id` unless one is tracked.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Stopped` once the engine has shut down.
    pub fn begin_session(&self, book_id: BookId, record: ProgressRecord) -> Result<(), EngineError> {
        self.send(Command::BeginSession { book_id, record })
    }

    /// End the reading session for `book_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Stopped` once the engine has shut down.
    pub fn end_session(&self, book_id: BookId) -> Result<(), EngineError> {
        self.send(Command::EndSession { book_id })
    }

    /// Wait until every snapshot enqueued before this call has been persisted.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Stopped` once the engine has shut down.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Flush(reply))?;
        done.await.map_err(|_| EngineError::Stopped)
    }

    /// Like [`flush`](Self::flush), then also wait until no remote work is outstanding.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Stopped` once the engine has shut down.
    pub async fn settle(&self) -> Result<(), EngineError> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Settle(reply))?;
        done.await.map_err(|_| EngineError::Stopped)
    }

    /// Receives the latest authorization failure; the caller should force a logout.
    #[must_use]
    pub fn authorization_alerts(&self) -> watch::Receiver<Option<AuthAlert>> {
        self.auth_rx.clone()
    }

    #[must_use]
    pub fn session_state(&self, book_id: &BookId) -> SessionState {
        self.shared.sessions.state(book_id)
    }

    #[must_use]
    pub fn is_in_flight(&self, book_id: &BookId) -> bool {
        self.shared.lock_in_flight().contains(book_id)
    }

    /// Snapshots enqueued but not drained yet.
    #[must_use]
    pub fn pending_snapshots(&self) -> usize {
        self.shared.queued.load(Ordering::Relaxed)
    }

    /// Close the queue, let the drain task finish everything already enqueued
    /// (including outstanding remote work), and wait for it.
    pub async fn shutdown(self) {
        let Self {
            commands,
            worker,
            shared,
            ..
        } = self;
        drop(commands);
        if let Err(err) = worker.await {
            error!(user = %shared.user, error = %err, "sync engine task failed");
        }
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::Stopped)
    }
}

struct Shared {
    user: UserId,
    clock: Clock,
    store: UserDataStore,
    remote: Arc<dyn ProgressRemote>,
    achievements: AchievementDispatcher,
    sessions: SessionCoordinator,
    cooldown: Mutex<CooldownTracker>,
    in_flight: Mutex<InFlightSet>,
    coalesce_delay: Duration,
    queued: AtomicUsize,
    auth_alerts: watch::Sender<Option<AuthAlert>>,
}

async fn run(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut settle_waiters: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Drain(snapshot) => {
                        shared.drain(snapshot, &mut tasks).await;
                        shared.queued.fetch_sub(1, Ordering::Relaxed);
                    }
                    Command::BeginSession { book_id, record } => {
                        let shared = Arc::clone(&shared);
                        tasks.spawn(async move { shared.begin_session(&book_id, record).await });
                    }
                    Command::EndSession { book_id } => {
                        let shared = Arc::clone(&shared);
                        tasks.spawn(async move { shared.end_session(&book_id).await });
                    }
                    Command::Flush(reply) => {
                        let _ = reply.send(());
                    }
                    Command::Settle(reply) => {
                        if tasks.is_empty() {
                            let _ = reply.send(());
                        } else {
                            settle_waiters.push(reply);
                        }
                    }
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    error!(user = %shared.user, error = %err, "remote task failed");
                }
                if tasks.is_empty() {
                    for waiter in settle_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(user = %shared.user, error = %err, "remote task failed");
        }
    }
    for waiter in settle_waiters {
        let _ = waiter.send(());
    }
    info!(user = %shared.user, "sync engine stopped");
}

impl Shared {
    fn lock_in_flight(&self) -> MutexGuard<'_, InFlightSet> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cooldown(&self) -> MutexGuard<'_, CooldownTracker> {
        self.cooldown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One drain round: persist, pick a target, and hand it to a remote task.
    async fn drain(self: &Arc<Self>, snapshot: Snapshot, tasks: &mut JoinSet<()>) {
        if let Err(err) = self.store.save_snapshot(&snapshot).await {
            error!(user = %self.user, error = %err, "failed to persist progress snapshot");
        }

        self.close_finished_sessions(&snapshot, tasks);

        let Some((book_id, record)) = select_target(&snapshot) else {
            debug!(user = %self.user, "snapshot has nothing to replicate");
            return;
        };

        let key = DedupKey::new(&book_id, &record);
        let cooling = self.lock_cooldown().is_cooling(&key, Instant::now());
        if cooling {
            debug!(key = %key, "skipping remote sync: identical write within cooldown");
            return;
        }

        let reservation = self.lock_in_flight().reserve(&book_id, record);
        match reservation {
            Reservation::Reserved => {
                let shared = Arc::clone(self);
                tasks.spawn(async move { shared.replicate(book_id).await });
            }
            Reservation::Superseded => {
                debug!(book = %book_id, pages = record.pages_read(), "pending sync will carry newer progress");
            }
            Reservation::Busy => {
                debug!(book = %book_id, pages = record.pages_read(), "skipping remote sync: request in flight");
            }
        }
    }

    /// Finished books give up their session whether or not they are replicated
    /// this round.
    fn close_finished_sessions(self: &Arc<Self>, snapshot: &Snapshot, tasks: &mut JoinSet<()>) {
        for (book_id, record) in snapshot.progress().iter() {
            if !record.is_completed() || !self.sessions.is_open(book_id) {
                continue;
            }
            debug!(book = %book_id, "book finished; ending its session");
            let shared = Arc::clone(self);
            let book_id = book_id.clone();
            tasks.spawn(async move { shared.end_session(&book_id).await });
        }
    }

    async fn replicate(&self, book_id: BookId) {
        let _release = InFlightRelease {
            shared: self,
            book_id: &book_id,
        };

        if !self.coalesce_delay.is_zero() {
            tokio::time::sleep(self.coalesce_delay).await;
        }

        let frozen = self.lock_in_flight().begin_send(&book_id);
        let Some(record) = frozen else {
            return;
        };

        // Stamp the key before the call so a quick identical follow-up is suppressed.
        let claimed = self
            .lock_cooldown()
            .try_claim(DedupKey::new(&book_id, &record), Instant::now());
        if !claimed {
            debug!(book = %book_id, pages = record.pages_read(), "skipping remote sync: identical write within cooldown");
            return;
        }

        if record.total_pages() > 0 && !record.is_completed() {
            if let Err(err) = self.sessions.begin(&book_id, record).await {
                self.absorb("create_session", &book_id, &err);
            }
        }

        let update = ProgressUpdate::new(&self.user, &book_id, &record, self.clock.now());
        match self.remote.sync_progress(&update).await {
            Ok(outcome) => {
                debug!(book = %book_id, pages = record.pages_read(), completed = update.completed, "progress replicated");
                self.achievements.dispatch(outcome.achievements());
            }
            Err(err) => self.absorb("sync_progress", &book_id, &err),
        }
    }

    async fn begin_session(&self, book_id: &BookId, record: ProgressRecord) {
        if let Err(err) = self.sessions.begin(book_id, record).await {
            self.absorb("create_session", book_id, &err);
        }
    }

    async fn end_session(&self, book_id: &BookId) {
        if let Err(err) = self.sessions.end(book_id).await {
            self.absorb("end_session", book_id, &err);
        }
    }

    /// Remote failures stop here. Only credential rejections leave the engine.
    fn absorb(&self, operation: &'static str, book_id: &BookId, err: &RemoteError) {
        match err {
            RemoteError::Unauthorized(status) => {
                error!(operation, book = %book_id, %status, "remote rejected credentials");
                self.auth_alerts.send_replace(Some(AuthAlert {
                    operation,
                    status: *status,
                }));
            }
            RemoteError::NotFound => {
                debug!(operation, book = %book_id, "remote route unavailable; keeping local state");
            }
            other => {
                warn!(operation, book = %book_id, error = %other, "remote call failed; keeping local state");
            }
        }
    }
}

/// Frees the book's in-flight slot however the remote task ends.
struct InFlightRelease<'a> {
    shared: &'a Shared,
    book_id: &'a BookId,
}

impl Drop for InFlightRelease<'_> {
    fn drop(&mut self) {
        self.shared.lock_in_flight().release(self.book_id);
    }
}
