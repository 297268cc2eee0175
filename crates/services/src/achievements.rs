//! Forwarding achievement unlocks from remote sync to a notification surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use reading_core::model::AchievementEvent;

/// Something that can show an achievement to the user.
pub trait AchievementSurface: Send + Sync {
    fn present(&self, event: &AchievementEvent, visible: bool);
}

/// Hands the first unlock of a successful sync to the surface.
#[derive(Clone, Default)]
pub struct AchievementDispatcher {
    surface: Option<Arc<dyn AchievementSurface>>,
}

impl AchievementDispatcher {
    #[must_use]
    pub fn new(surface: Arc<dyn AchievementSurface>) -> Self {
        Self {
            surface: Some(surface),
        }
    }

    /// A dispatcher that only logs.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Show exactly one of `unlocked` (the first), if any. Returns what was shown.
    pub fn dispatch<'a>(&self, unlocked: &'a [AchievementEvent]) -> Option<&'a AchievementEvent> {
        let first = unlocked.first()?;
        if unlocked.len() > 1 {
            debug!(skipped = unlocked.len() - 1, "only the first unlock is shown");
        }
        info!(achievement = %first.id, points = first.points, "achievement unlocked");
        if let Some(surface) = &self.surface {
            surface.present(first, true);
        }
        Some(first)
    }
}

/// What an [`AchievementFeed`] is currently showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementToast {
    pub event: AchievementEvent,
    pub visible: bool,
    seq: u64,
}

/// A watchable notification slot that hides itself after `dismiss_after`.
///
/// UI code subscribes and renders the latest toast. Dismissal runs on its own
/// timer task and never touches sync state.
#[derive(Clone)]
pub struct AchievementFeed {
    tx: Arc<watch::Sender<Option<AchievementToast>>>,
    seq: Arc<AtomicU64>,
    dismiss_after: Duration,
}

impl AchievementFeed {
    pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(4);

    #[must_use]
    pub fn new(dismiss_after: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            seq: Arc::new(AtomicU64::new(0)),
            dismiss_after,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<AchievementToast>> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> Option<AchievementToast> {
        self.tx.borrow().clone()
    }
}

impl Default for AchievementFeed {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DISMISS_AFTER)
    }
}

impl AchievementSurface for AchievementFeed {
    fn present(&self, event: &AchievementEvent, visible: bool) {
        if !visible {
            self.tx.send_if_modified(|slot| match slot {
                Some(toast) if toast.event.id == event.id && toast.visible => {
                    toast.visible = false;
                    true
                }
                _ => false,
            });
            return;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send_replace(Some(AchievementToast {
            event: event.clone(),
            visible: true,
            seq,
        }));

        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let tx = Arc::clone(&self.tx);
        let delay = self.dismiss_after;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tx.send_if_modified(|slot| match slot {
                Some(toast) if toast.seq == seq && toast.visible => {
                    toast.visible = false;
                    true
                }
                _ => false,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reading_core::model::Rarity;
    use std::sync::Mutex;

    fn event(id: &str) -> AchievementEvent {
        AchievementEvent {
            id: id.to_string(),
            title: format!("Unlocked {id}"),
            points: 10,
            rarity: Rarity::Rare,
        }
    }

    #[derive(Default)]
    struct Recorder {
        shown: Mutex<Vec<(String, bool)>>,
    }

    impl AchievementSurface for Recorder {
        fn present(&self, event: &AchievementEvent, visible: bool) {
            self.shown.lock().unwrap().push((event.id.clone(), visible));
        }
    }

    #[test]
    fn dispatches_only_the_first_unlock() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = AchievementDispatcher::new(recorder.clone());
        let unlocked = [event("a"), event("b")];
        let shown = dispatcher.dispatch(&unlocked).unwrap();
        assert_eq!(shown.id, "a");
        assert_eq!(*recorder.shown.lock().unwrap(), vec![("a".to_string(), true)]);
    }

    #[test]
    fn nothing_to_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = AchievementDispatcher::new(recorder.clone());
        assert!(dispatcher.dispatch(&[]).is_none());
        assert!(recorder.shown.lock().unwrap().is_empty());
        assert!(AchievementDispatcher::disabled().dispatch(&[event("a")]).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn feed_auto_dismisses() {
        let feed = AchievementFeed::new(Duration::from_secs(4));
        feed.present(&event("a"), true);
        assert!(feed.current().unwrap().visible);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let toast = feed.current().unwrap();
        assert_eq!(toast.event.id, "a");
        assert!(!toast.visible);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_hide_newer_toast() {
        let feed = AchievementFeed::new(Duration::from_secs(4));
        feed.present(&event("a"), true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        feed.present(&event("b"), true);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let toast = feed.current().unwrap();
        assert_eq!(toast.event.id, "b");
        assert!(toast.visible);
    }

    #[test]
    fn explicit_hide_matches_event() {
        let feed = AchievementFeed::default();
        feed.present(&event("a"), true);
        feed.present(&event("other"), false);
        assert!(feed.current().unwrap().visible);
        feed.present(&event("a"), false);
        assert!(!feed.current().unwrap().visible);
    }
}
