mod achievement;
mod challenge;
mod ids;
mod progress;
mod session;

pub use ids::{BookId, ParseIdError, SessionId, UserId};

pub use achievement::{AchievementEvent, Rarity};
pub use challenge::{ChallengeGoal, ChallengeGoalError, ChallengeProgress};
pub use progress::{DedupKey, ProgressError, ProgressMap, ProgressRecord, Snapshot, parse_page_count};
pub use session::{ReadingSession, SessionState, SessionTransitionError};
