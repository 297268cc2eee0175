use reading_core::model::{BookId, ProgressRecord, Snapshot};

/// Pick the one book of a drained snapshot that may be replicated this round.
///
/// The current book wins when it has progress worth sending; otherwise the first
/// such book in the map. `None` means the round is local-only.
#[must_use]
pub fn select_target(snapshot: &Snapshot) -> Option<(BookId, ProgressRecord)> {
    let progress = snapshot.progress();
    if let Some(current) = snapshot.current_book() {
        if let Some(record) = progress.get(current).filter(|r| r.is_sync_candidate()) {
            return Some((current.clone(), *record));
        }
    }
    progress
        .iter()
        .find(|(_, record)| record.is_sync_candidate())
        .map(|(book_id, record)| (book_id.clone(), *record))
}
