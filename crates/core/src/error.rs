use thiserror::Error;

use crate::model::{ChallengeGoalError, ParseIdError, ProgressError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    ChallengeGoal(#[from] ChallengeGoalError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
