use std::collections::HashMap;

use reading_core::model::{BookId, ProgressRecord};

/// Outcome of asking to replicate a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The book was idle; the caller now owns its remote sync.
    Reserved,
    /// A sync is reserved but not yet sent; it will carry this newer record.
    Superseded,
    /// A request is on the wire; this round is skipped.
    Busy,
}

#[derive(Debug)]
struct Entry {
    latest: ProgressRecord,
    sending: bool,
}

/// Books with a remote sync pending or awaiting a response.
#[derive(Debug, Default)]
pub struct InFlightSet {
    entries: HashMap<BookId, Entry>,
}

impl InFlightSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, book_id: &BookId, record: ProgressRecord) -> Reservation {
        match self.entries.get_mut(book_id) {
            Some(entry) if entry.sending => Reservation::Busy,
            Some(entry) => {
                entry.latest = record;
                Reservation::Superseded
            }
            None => {
                self.entries.insert(
                    book_id.clone(),
                    Entry {
                        latest: record,
                        sending: false,
                    },
                );
                Reservation::Reserved
            }
        }
    }

    /// Freeze the payload for `book_id` and return it. `None` if not reserved.
    pub fn begin_send(&mut self, book_id: &BookId) -> Option<ProgressRecord> {
        let entry = self.entries.get_mut(book_id)?;
        entry.sending = true;
        Some(entry.latest)
    }

    pub fn release(&mut self, book_id: &BookId) {
        self.entries.remove(book_id);
    }

    #[must_use]
    pub fn contains(&self, book_id: &BookId) -> bool {
        self.entries.contains_key(book_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
