use std::sync::Arc;

use reading_core::model::{BookId, ChallengeGoal, ProgressMap, ProgressRecord, Snapshot, UserId};
use reading_core::time::fixed_now;
use storage::repository::KeyValueStore;
use storage::sqlite::SqliteStore;
use storage::{Storage, UserDataStore};

fn book(id: &str) -> BookId {
    BookId::new(id).unwrap()
}

#[tokio::test]
async fn sqlite_kv_set_get_remove() {
    let repo = SqliteStore::connect("sqlite:file:memdb_kv_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    // Migrations are idempotent.
    repo.migrate().await.expect("migrate twice");

    assert_eq!(repo.get("progress:u1").await.unwrap(), None);
    repo.set("progress:u1", "{}".into()).await.unwrap();
    repo.set("progress:u1", "{\"b\":1}".into()).await.unwrap();
    assert_eq!(
        repo.get("progress:u1").await.unwrap().as_deref(),
        Some("{\"b\":1}")
    );

    repo.remove("progress:u1").await.unwrap();
    assert_eq!(repo.get("progress:u1").await.unwrap(), None);
}

#[tokio::test]
async fn user_data_survives_reconnect() {
    let path = std::env::temp_dir().join(format!(
        "reading-tracker-it-{}-{}.sqlite3",
        std::process::id(),
        fixed_now().timestamp()
    ));
    let _ = std::fs::remove_file(&path);
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let user = UserId::new("reader").unwrap();

    {
        let storage = Storage::sqlite(&url).await.expect("open");
        let store = UserDataStore::new(Arc::clone(&storage.kv), user.clone());
        let progress =
            ProgressMap::new().with_record(book("dune"), ProgressRecord::new(212, 412).unwrap());
        let snapshot = Snapshot::new(
            progress,
            Some(book("dune")),
            Some(ChallengeGoal::new(30).unwrap()),
        );
        store.save_snapshot(&snapshot).await.expect("save");
    }

    let storage = Storage::sqlite(&url).await.expect("reopen");
    let store = UserDataStore::new(Arc::clone(&storage.kv), user);
    let data = store.load().await.expect("load");
    assert_eq!(data.progress.get(&book("dune")).unwrap().pages_read(), 212);
    assert_eq!(data.current_book, Some(book("dune")));
    assert_eq!(data.challenge_goal.unwrap().target_books(), 30);

    drop(storage);
    let _ = std::fs::remove_file(&path);
}
