//! Action Error Types

use thiserror::Error;

/// Illegal lifecycle transition on a single [`Step`](super::Step).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Step {0} is already active")]
    AlreadyActive(String),

    #[error("Step {0} is already done")]
    AlreadyDone(String),

    #[error("Step {0} is not active")]
    NotActive(String),
}

/// Misuse of a [`MultiStepAction`](super::MultiStepAction).
///
/// These are resume-logic errors, never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Action has already failed")]
    AlreadyFailed,

    #[error("Action is already active")]
    AlreadyActive,

    #[error("Missing executors for steps: {}", .0.join(", "))]
    MissingExecutors(Vec<String>),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Result of driving an action: either the engine refused, or a step's own
/// executor failed with `E`.
#[derive(Error, Debug)]
pub enum ExecuteError<E> {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Step(E),
}

impl<E> ExecuteError<E> {
    /// Returns the step's own error, if that is what failed.
    pub fn into_step_error(self) -> Option<E> {
        match self {
            ExecuteError::Step(e) => Some(e),
            ExecuteError::Action(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executors_lists_identifiers() {
        let err = ActionError::MissingExecutors(vec!["b".into(), "c".into()]);
        assert_eq!(err.to_string(), "Missing executors for steps: b, c");
    }

    #[test]
    fn test_step_error_is_transparent() {
        let err: ExecuteError<std::io::Error> =
            ExecuteError::Step(std::io::Error::other("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.into_step_error().is_some());
    }
}
