#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use reading_core::model::{
    AchievementEvent, BookId, ProgressMap, ProgressRecord, Rarity, ReadingSession, SessionId,
    Snapshot, UserId,
};
use reading_core::time::{fixed_clock, fixed_now};
use services::achievements::AchievementSurface;
use services::remote::{NewSession, ProgressRemote, ProgressUpdate, SyncOutcome};
use services::{EngineConfig, RemoteError, SyncEngine, SyncEngineBuilder};
use storage::{InMemoryStore, UserDataStore};

pub fn user() -> UserId {
    UserId::new("reader-1").unwrap()
}

pub fn book(id: &str) -> BookId {
    BookId::new(id).unwrap()
}

pub fn session(id: &str, book_id: &str) -> ReadingSession {
    ReadingSession {
        id: SessionId::new(id).unwrap(),
        book_id: book(book_id),
        started_at: fixed_now(),
    }
}

pub fn achievement(id: &str) -> AchievementEvent {
    AchievementEvent {
        id: id.to_string(),
        title: format!("Achievement {id}"),
        points: 50,
        rarity: Rarity::Epic,
    }
}

pub fn snapshot(entries: &[(&str, u32, u32)], current: Option<&str>) -> Snapshot {
    let progress: ProgressMap = entries
        .iter()
        .map(|(id, read, total)| (book(id), ProgressRecord::new(*read, *total).unwrap()))
        .collect();
    Snapshot::new(progress, current.map(book), None)
}

pub fn user_store(kv: &InMemoryStore) -> UserDataStore {
    UserDataStore::new(Arc::new(kv.clone()), user())
}

/// Engine wired to `remote` and an in-memory store, with a fixed clock.
pub fn builder(kv: &InMemoryStore, remote: &Arc<FakeRemote>, config: EngineConfig) -> SyncEngineBuilder {
    let remote: Arc<dyn ProgressRemote> = remote.clone();
    SyncEngine::builder(user_store(kv), remote)
        .with_clock(fixed_clock())
        .with_config(config)
}

pub fn immediate() -> EngineConfig {
    EngineConfig::default().with_coalesce_delay(Duration::ZERO)
}

pub async fn stored(kv: &InMemoryStore, book_id: &str) -> Option<ProgressRecord> {
    let data = user_store(kv).load().await.unwrap();
    data.progress.get(&book(book_id)).copied()
}

/// Yield until `remote` has seen `count` progress calls.
pub async fn wait_for_calls(remote: &FakeRemote, count: usize) {
    for _ in 0..1_000 {
        if remote.progress_calls().len() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("remote saw {} progress calls, expected {count}", remote.progress_calls().len());
}

/// Scriptable backend. Unscripted calls succeed with empty results.
#[derive(Default)]
pub struct FakeRemote {
    progress_calls: Mutex<Vec<ProgressUpdate>>,
    progress_results: Mutex<VecDeque<Result<SyncOutcome, RemoteError>>>,
    active_results: Mutex<VecDeque<Option<ReadingSession>>>,
    create_results: Mutex<VecDeque<Result<ReadingSession, RemoteError>>>,
    active_calls: AtomicUsize,
    create_calls: AtomicUsize,
    ended: Mutex<Vec<SessionId>>,
    gate: Option<Semaphore>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `sync_progress` blocks until `open_gate` is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn push_progress_result(&self, result: Result<SyncOutcome, RemoteError>) {
        self.progress_results.lock().unwrap().push_back(result);
    }

    pub fn push_active(&self, session: Option<ReadingSession>) {
        self.active_results.lock().unwrap().push_back(session);
    }

    pub fn push_create(&self, result: Result<ReadingSession, RemoteError>) {
        self.create_results.lock().unwrap().push_back(result);
    }

    pub fn progress_calls(&self) -> Vec<ProgressUpdate> {
        self.progress_calls.lock().unwrap().clone()
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Vec<SessionId> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressRemote for FakeRemote {
    async fn sync_progress(&self, update: &ProgressUpdate) -> Result<SyncOutcome, RemoteError> {
        self.progress_calls.lock().unwrap().push(update.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let scripted = self.progress_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(SyncOutcome::default()))
    }

    async fn create_session(&self, request: &NewSession) -> Result<ReadingSession, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.create_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(session(
                &format!("s-{}", request.entity_id),
                request.entity_id.as_str(),
            ))
        })
    }

    async fn active_session(
        &self,
        _book_id: &BookId,
    ) -> Result<Option<ReadingSession>, RemoteError> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.active_results.lock().unwrap().pop_front();
        Ok(scripted.flatten())
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<(), RemoteError> {
        self.ended.lock().unwrap().push(session_id.clone());
        Ok(())
    }
}

/// Notification surface that remembers what it was asked to show.
#[derive(Default)]
pub struct RecordingSurface {
    shown: Mutex<Vec<(String, bool)>>,
}

impl RecordingSurface {
    pub fn shown(&self) -> Vec<(String, bool)> {
        self.shown.lock().unwrap().clone()
    }
}

impl AchievementSurface for RecordingSurface {
    fn present(&self, event: &AchievementEvent, visible: bool) {
        self.shown.lock().unwrap().push((event.id.clone(), visible));
    }
}
