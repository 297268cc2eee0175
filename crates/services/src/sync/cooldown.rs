use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use reading_core::model::DedupKey;

/// Remembers when each remote write was last started.
///
/// A key is "cooling" for `window` after it was recorded. Entries are pruned on
/// every `record`, so the map only ever holds keys from the current window.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    seen: HashMap<DedupKey, Instant>,
}

impl CooldownTracker {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_cooling(&self, key: &DedupKey, now: Instant) -> bool {
        self.seen
            .get(key)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.window)
    }

    pub fn record(&mut self, key: DedupKey, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < window);
        self.seen.insert(key, now);
    }

    /// Record `key` unless it is cooling. Returns whether it was recorded.
    pub fn try_claim(&mut self, key: DedupKey, now: Instant) -> bool {
        if self.is_cooling(&key, now) {
            return false;
        }
        self.record(key, now);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
