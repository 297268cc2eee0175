#![forbid(unsafe_code)]

pub mod achievements;
pub mod error;
pub mod remote;
pub mod sync;
pub mod tracker;

pub use reading_core::Clock;

pub use achievements::{AchievementDispatcher, AchievementFeed, AchievementSurface, AchievementToast};
pub use error::{EngineError, RemoteError, TrackerError};
pub use remote::{HttpProgressRemote, OfflineRemote, ProgressRemote, RemoteConfig};
pub use sync::{AuthAlert, EngineConfig, SyncEngine, SyncEngineBuilder};
pub use tracker::ReadingTracker;
