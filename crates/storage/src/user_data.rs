//! Per-user durable state: progress map, currently-reading book and challenge goal.
//!
//! Every record lives under `"<recordType>:<userId>"` in a [`KeyValueStore`].
//! A per-user schema version drives one-way data migrations on load.

use std::fmt;
use std::sync::Arc;

use reading_core::model::{BookId, ChallengeGoal, ProgressMap, Snapshot, UserId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::repository::{KeyValueStore, StorageError};

/// Latest user-data schema version understood by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Book keys written by old clients that never referred to a real book.
const LEGACY_BOOK_KEYS: [&str; 3] = ["undefined", "null", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Progress,
    CurrentBook,
    ChallengeGoal,
    SchemaVersion,
}

impl RecordType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::CurrentBook => "currentBook",
            Self::ChallengeGoal => "challengeGoal",
            Self::SchemaVersion => "schemaVersion",
        }
    }

    #[must_use]
    pub fn key_for(self, user: &UserId) -> String {
        format!("{}:{}", self.as_str(), user)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything persisted for one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    pub progress: ProgressMap,
    pub current_book: Option<BookId>,
    pub challenge_goal: Option<ChallengeGoal>,
}

impl From<&Snapshot> for UserData {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            progress: snapshot.progress().clone(),
            current_book: snapshot.current_book().cloned(),
            challenge_goal: snapshot.challenge_goal(),
        }
    }
}

/// Typed access to one user's records.
#[derive(Clone)]
pub struct UserDataStore {
    kv: Arc<dyn KeyValueStore>,
    user: UserId,
}

impl UserDataStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, user: UserId) -> Self {
        Self { kv, user }
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Migrate, then read the user's data. Missing records load as empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend fails or a record cannot be decoded.
    pub async fn load(&self) -> Result<UserData, StorageError> {
        self.migrate().await?;
        Ok(UserData {
            progress: self
                .read_json(RecordType::Progress)
                .await?
                .unwrap_or_default(),
            current_book: self.read_json(RecordType::CurrentBook).await?,
            challenge_goal: self.read_json(RecordType::ChallengeGoal).await?,
        })
    }

    /// Write all three records.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if any write fails. Earlier writes are not rolled back.
    pub async fn save(&self, data: &UserData) -> Result<(), StorageError> {
        self.write_json(RecordType::Progress, Some(&data.progress))
            .await?;
        self.write_json(RecordType::CurrentBook, data.current_book.as_ref())
            .await?;
        self.write_json(RecordType::ChallengeGoal, data.challenge_goal.as_ref())
            .await?;
        Ok(())
    }

    /// Persist the end state described by a drained snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if any write fails.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        self.save(&UserData::from(snapshot)).await
    }

    /// Remove the user's progress, current book and goal. The schema version is kept.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a delete fails.
    pub async fn clear(&self) -> Result<(), StorageError> {
        for record in [
            RecordType::Progress,
            RecordType::CurrentBook,
            RecordType::ChallengeGoal,
        ] {
            self.kv.remove(&record.key_for(&self.user)).await?;
        }
        Ok(())
    }

    /// Stored schema version; `0` when the user has never been migrated.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored version is not a number.
    pub async fn schema_version(&self) -> Result<u32, StorageError> {
        let Some(raw) = self
            .kv
            .get(&RecordType::SchemaVersion.key_for(&self.user))
            .await?
        else {
            return Ok(0);
        };
        raw.trim()
            .parse()
            .map_err(|_| StorageError::Serialization(format!("bad schema version {raw:?}")))
    }

    /// Apply every pending migration step in order and return the resulting version.
    ///
    /// Versions newer than [`CURRENT_SCHEMA_VERSION`] are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a step or the version bump fails.
    pub async fn migrate(&self) -> Result<u32, StorageError> {
        let mut version = self.schema_version().await?;
        while version < CURRENT_SCHEMA_VERSION {
            let next = version + 1;
            match next {
                1 => self.drop_legacy_progress().await?,
                _ => {
                    return Err(StorageError::Serialization(format!(
                        "no migration step for schema version {next}"
                    )));
                }
            }
            self.kv
                .set(&RecordType::SchemaVersion.key_for(&self.user), next.to_string())
                .await?;
            info!(user = %self.user, version = next, "user data migrated");
            version = next;
        }
        Ok(version)
    }

    /// v1: old clients stored progress under placeholder book keys; such maps are unusable.
    async fn drop_legacy_progress(&self) -> Result<(), StorageError> {
        let progress_key = RecordType::Progress.key_for(&self.user);
        if let Some(raw) = self.kv.get(&progress_key).await? {
            let has_legacy_key = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw)
                .map(|map| map.keys().any(|key| is_legacy_book_key(key)))
                .unwrap_or(false);
            if has_legacy_key {
                info!(user = %self.user, "clearing progress stored under legacy book keys");
                self.kv.remove(&progress_key).await?;
            }
        }

        let current_key = RecordType::CurrentBook.key_for(&self.user);
        if let Some(raw) = self.kv.get(&current_key).await? {
            let legacy = serde_json::from_str::<String>(&raw)
                .map(|id| is_legacy_book_key(&id))
                .unwrap_or(false);
            if legacy {
                self.kv.remove(&current_key).await?;
            }
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        record: RecordType,
    ) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.kv.get(&record.key_for(&self.user)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("{record}: {e}")))
    }

    async fn write_json<T: Serialize>(
        &self,
        record: RecordType,
        value: Option<&T>,
    ) -> Result<(), StorageError> {
        let key = record.key_for(&self.user);
        match value {
            Some(value) => {
                let raw = serde_json::to_string(value)
                    .map_err(|e| StorageError::Serialization(format!("{record}: {e}")))?;
                self.kv.set(&key, raw).await
            }
            None => self.kv.remove(&key).await,
        }
    }
}

fn is_legacy_book_key(key: &str) -> bool {
    LEGACY_BOOK_KEYS.contains(&key.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStore;
    use reading_core::model::ProgressRecord;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn book(id: &str) -> BookId {
        BookId::new(id).unwrap()
    }

    fn store_for(kv: &InMemoryStore, id: &str) -> UserDataStore {
        UserDataStore::new(Arc::new(kv.clone()), user(id))
    }

    #[test]
    fn keys_are_scoped_by_record_and_user() {
        assert_eq!(RecordType::Progress.key_for(&user("u1")), "progress:u1");
        assert_eq!(
            RecordType::ChallengeGoal.key_for(&user("u1")),
            "challengeGoal:u1"
        );
    }

    #[tokio::test]
    async fn empty_user_loads_defaults_and_is_stamped() {
        let kv = InMemoryStore::new();
        let store = store_for(&kv, "u1");
        let data = store.load().await.unwrap();
        assert_eq!(data, UserData::default());
        assert_eq!(store.schema_version().await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let kv = InMemoryStore::new();
        let store = store_for(&kv, "u1");
        let progress =
            ProgressMap::new().with_record(book("b1"), ProgressRecord::new(40, 320).unwrap());
        let snapshot = Snapshot::new(
            progress.clone(),
            Some(book("b1")),
            Some(ChallengeGoal::new(12).unwrap()),
        );
        store.save_snapshot(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.progress, progress);
        assert_eq!(loaded.current_book, Some(book("b1")));
        assert_eq!(loaded.challenge_goal.unwrap().target_books(), 12);
    }

    #[tokio::test]
    async fn clearing_current_book_removes_key() {
        let kv = InMemoryStore::new();
        let store = store_for(&kv, "u1");
        let mut data = UserData {
            current_book: Some(book("b1")),
            ..UserData::default()
        };
        store.save(&data).await.unwrap();
        data.current_book = None;
        store.save(&data).await.unwrap();
        assert_eq!(kv.get("currentBook:u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn users_do_not_see_each_other() {
        let kv = InMemoryStore::new();
        let alice = store_for(&kv, "alice");
        let bob = store_for(&kv, "bob");
        let data = UserData {
            progress: ProgressMap::new().with_record(book("b1"), ProgressRecord::finished(10)),
            ..UserData::default()
        };
        alice.save(&data).await.unwrap();
        assert!(bob.load().await.unwrap().progress.is_empty());
    }

    #[tokio::test]
    async fn migration_drops_legacy_progress_once() {
        let kv = InMemoryStore::new();
        kv.set(
            "progress:u1",
            r#"{"undefined":{"pagesRead":3,"totalPages":0},"b1":{"pagesRead":1,"totalPages":9}}"#
                .into(),
        )
        .await
        .unwrap();
        kv.set("currentBook:u1", "\"undefined\"".into())
            .await
            .unwrap();
        let store = store_for(&kv, "u1");

        let data = store.load().await.unwrap();
        assert!(data.progress.is_empty());
        assert_eq!(data.current_book, None);

        // Already at the current version, so later writes are left alone.
        kv.set("progress:u1", r#"{"null":{"pagesRead":1,"totalPages":2}}"#.into())
            .await
            .unwrap();
        assert_eq!(store.migrate().await.unwrap(), CURRENT_SCHEMA_VERSION);
        assert!(kv.get("progress:u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn migration_keeps_clean_progress() {
        let kv = InMemoryStore::new();
        kv.set("progress:u1", r#"{"b1":{"pagesRead":1,"totalPages":9}}"#.into())
            .await
            .unwrap();
        let data = store_for(&kv, "u1").load().await.unwrap();
        assert_eq!(data.progress.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_version_is_an_error() {
        let kv = InMemoryStore::new();
        kv.set("schemaVersion:u1", "two".into()).await.unwrap();
        let err = store_for(&kv, "u1").load().await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
