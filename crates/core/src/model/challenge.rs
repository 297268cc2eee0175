use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChallengeGoalError {
    #[error("challenge goal must be at least {min} book")]
    TooSmall { min: u32 },
    #[error("challenge goal cannot exceed {max} books")]
    TooLarge { max: u32 },
}

/// Number of books the user wants to finish this year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ChallengeGoal(u32);

impl ChallengeGoal {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 1000;

    /// Validate a goal.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeGoalError` when the target is outside `MIN..=MAX`.
    pub fn new(target_books: u32) -> Result<Self, ChallengeGoalError> {
        if target_books < Self::MIN {
            return Err(ChallengeGoalError::TooSmall { min: Self::MIN });
        }
        if target_books > Self::MAX {
            return Err(ChallengeGoalError::TooLarge { max: Self::MAX });
        }
        Ok(Self(target_books))
    }

    #[must_use]
    pub fn target_books(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ChallengeGoal {
    type Error = ChallengeGoalError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChallengeGoal> for u32 {
    fn from(goal: ChallengeGoal) -> Self {
        goal.0
    }
}

/// How far the user is into their yearly challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeProgress {
    pub completed: u32,
    pub target: Option<u32>,
}

impl ChallengeProgress {
    #[must_use]
    pub fn is_met(&self) -> bool {
        self.target.is_some_and(|target| self.completed >= target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_bounds() {
        assert_eq!(ChallengeGoal::new(0), Err(ChallengeGoalError::TooSmall { min: 1 }));
        assert_eq!(
            ChallengeGoal::new(1001),
            Err(ChallengeGoalError::TooLarge { max: 1000 })
        );
        assert_eq!(ChallengeGoal::new(24).unwrap().target_books(), 24);
    }

    #[test]
    fn challenge_progress_met() {
        let progress = ChallengeProgress {
            completed: 12,
            target: Some(12),
        };
        assert!(progress.is_met());
        let no_goal = ChallengeProgress {
            completed: 40,
            target: None,
        };
        assert!(!no_goal.is_met());
    }
}
