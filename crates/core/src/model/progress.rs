use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BookId, ChallengeGoal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("pages read ({pages_read}) exceeds total pages ({total_pages})")]
    PagesExceedTotal { pages_read: u32, total_pages: u32 },

    #[error("page count is not a whole number: {raw:?}")]
    NotANumber { raw: String },

    #[error("total pages unknown for book {book_id}")]
    TotalUnknown { book_id: String },
}

/// Reading progress for one book.
///
/// A `total_pages` of zero means the length is not known yet; in that case
/// `pages_read` is unbounded and the record never counts as completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawProgress", rename_all = "camelCase")]
pub struct ProgressRecord {
    pages_read: u32,
    total_pages: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProgress {
    #[serde(default)]
    pages_read: u32,
    #[serde(default)]
    total_pages: u32,
}

impl TryFrom<RawProgress> for ProgressRecord {
    type Error = ProgressError;

    fn try_from(raw: RawProgress) -> Result<Self, Self::Error> {
        Self::new(raw.pages_read, raw.total_pages)
    }
}

impl ProgressRecord {
    /// Creates a record.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::PagesExceedTotal` when the total is known and smaller
    /// than the pages read.
    pub fn new(pages_read: u32, total_pages: u32) -> Result<Self, ProgressError> {
        if total_pages > 0 && pages_read > total_pages {
            return Err(ProgressError::PagesExceedTotal {
                pages_read,
                total_pages,
            });
        }
        Ok(Self {
            pages_read,
            total_pages,
        })
    }

    /// A record with every page read.
    #[must_use]
    pub fn finished(total_pages: u32) -> Self {
        Self {
            pages_read: total_pages,
            total_pages,
        }
    }

    #[must_use]
    pub fn pages_read(&self) -> u32 {
        self.pages_read
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.total_pages > 0 && self.pages_read >= self.total_pages
    }

    /// True when the record carries something worth replicating.
    #[must_use]
    pub fn is_sync_candidate(&self) -> bool {
        self.pages_read > 0 || self.is_completed()
    }

    /// Completion ratio in `0.0..=1.0`, or `None` while the total is unknown.
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        if self.total_pages == 0 {
            return None;
        }
        Some(f64::from(self.pages_read) / f64::from(self.total_pages))
    }
}

/// Parse a user-entered page count.
///
/// # Errors
///
/// Returns `ProgressError::NotANumber` for anything that is not a non-negative integer.
pub fn parse_page_count(raw: &str) -> Result<u32, ProgressError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| ProgressError::NotANumber {
            raw: raw.to_string(),
        })
}

/// Progress for every tracked book, keyed by book id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressMap(BTreeMap<BookId, ProgressRecord>);

impl ProgressMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, book_id: &BookId) -> Option<&ProgressRecord> {
        self.0.get(book_id)
    }

    /// Returns a copy of this map with `book_id` set to `record`.
    #[must_use]
    pub fn with_record(&self, book_id: BookId, record: ProgressRecord) -> Self {
        let mut next = self.0.clone();
        next.insert(book_id, record);
        Self(next)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BookId, &ProgressRecord)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.0.values().filter(|r| r.is_completed()).count()
    }
}

impl FromIterator<(BookId, ProgressRecord)> for ProgressMap {
    fn from_iter<T: IntoIterator<Item = (BookId, ProgressRecord)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Desired end state captured at enqueue time.
///
/// Besides the progress map it carries the currently-reading book and the
/// challenge goal, since all three are persisted together once drained.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    progress: ProgressMap,
    current_book: Option<BookId>,
    challenge_goal: Option<ChallengeGoal>,
}

impl Snapshot {
    #[must_use]
    pub fn new(
        progress: ProgressMap,
        current_book: Option<BookId>,
        challenge_goal: Option<ChallengeGoal>,
    ) -> Self {
        Self {
            progress,
            current_book,
            challenge_goal,
        }
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressMap {
        &self.progress
    }

    #[must_use]
    pub fn current_book(&self) -> Option<&BookId> {
        self.current_book.as_ref()
    }

    #[must_use]
    pub fn challenge_goal(&self) -> Option<ChallengeGoal> {
        self.challenge_goal
    }
}

/// Identity of one remote write, used only for the short cooldown window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    book_id: BookId,
    pages_read: u32,
    total_pages: u32,
    completed: bool,
}

impl DedupKey {
    #[must_use]
    pub fn new(book_id: &BookId, record: &ProgressRecord) -> Self {
        Self {
            book_id: book_id.clone(),
            pages_read: record.pages_read(),
            total_pages: record.total_pages(),
            completed: record.is_completed(),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.book_id, self.pages_read, self.total_pages, self.completed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str) -> BookId {
        BookId::new(id).unwrap()
    }

    #[test]
    fn rejects_pages_beyond_known_total() {
        let err = ProgressRecord::new(120, 100).unwrap_err();
        assert_eq!(
            err,
            ProgressError::PagesExceedTotal {
                pages_read: 120,
                total_pages: 100
            }
        );
    }

    #[test]
    fn unknown_total_accepts_any_pages_and_is_never_completed() {
        let record = ProgressRecord::new(500, 0).unwrap();
        assert!(!record.is_completed());
        assert!(record.is_sync_candidate());
        assert_eq!(record.fraction(), None);
    }

    #[test]
    fn completed_is_derived_from_pages() {
        assert!(ProgressRecord::new(100, 100).unwrap().is_completed());
        assert!(!ProgressRecord::new(99, 100).unwrap().is_completed());
        assert!(ProgressRecord::finished(250).is_completed());
        assert!(!ProgressRecord::default().is_sync_candidate());
    }

    #[test]
    fn parse_page_count_rejects_garbage() {
        assert_eq!(parse_page_count(" 42 ").unwrap(), 42);
        assert!(parse_page_count("-3").is_err());
        assert!(parse_page_count("ten").is_err());
    }

    #[test]
    fn with_record_leaves_original_untouched() {
        let original = ProgressMap::new();
        let next = original.with_record(book("a"), ProgressRecord::new(5, 10).unwrap());
        assert!(original.is_empty());
        assert_eq!(next.get(&book("a")).unwrap().pages_read(), 5);
    }

    #[test]
    fn progress_map_serializes_as_object() {
        let map = ProgressMap::new().with_record(book("a"), ProgressRecord::new(5, 10).unwrap());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"a":{"pagesRead":5,"totalPages":10}}"#);
        let back: ProgressMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn deserializing_invalid_record_fails() {
        let err = serde_json::from_str::<ProgressMap>(r#"{"a":{"pagesRead":11,"totalPages":10}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn dedup_key_is_entity_qualified() {
        let record = ProgressRecord::finished(100);
        let a = DedupKey::new(&book("a"), &record);
        let b = DedupKey::new(&book("b"), &record);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "a:100:100:true");
    }
}
