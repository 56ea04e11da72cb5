use thiserror::Error;

use crate::{model::OperationState, shell::CommandOutput};

pub type StepResult = std::result::Result<String, StepError>;

/// Outcome of a data type step that did not end in DONE. Scoped to one item;
/// none of these abort the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// The data type this item cannot do without is missing.
    #[error("not found: {0}")]
    NotFoundRequired(String),

    #[error("not found, skipped: {0}")]
    NotFoundOptional(String),

    /// Selected out, unchanged since the last run, or similar.
    #[error("{0}")]
    Skipped(String),

    #[error("{0}")]
    CommandFailure(String),

    #[error("{0}")]
    VerificationFailure(String),

    #[error("{0}")]
    NetworkFailure(String),
}

impl StepError {
    pub fn command(output: &CommandOutput) -> Self {
        StepError::CommandFailure(output.out_string())
    }

    pub fn state(&self) -> OperationState {
        match self {
            StepError::NotFoundOptional(_) | StepError::Skipped(_) => OperationState::Skip,
            StepError::NotFoundRequired(_)
            | StepError::CommandFailure(_)
            | StepError::VerificationFailure(_)
            | StepError::NetworkFailure(_) => OperationState::Error,
        }
    }

    /// Whether later data types of the same item must not run.
    pub fn halts_item(&self) -> bool {
        matches!(
            self,
            StepError::NotFoundRequired(_) | StepError::VerificationFailure(_)
        )
    }
}

impl From<super::Error> for StepError {
    fn from(error: super::Error) -> Self {
        match error {
            super::Error::Network(message) => StepError::NetworkFailure(message),
            super::Error::NoActiveSession | super::Error::LoginFailed(_) => {
                StepError::NetworkFailure(error.to_string())
            }
            other => StepError::CommandFailure(other.to_string()),
        }
    }
}
