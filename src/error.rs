use thiserror::Error;

/// Errors returned by [`crate::Engine`] operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("case not found: {0}")]
    CaseNotFound(String),

    #[error("task {task_id} not found in case {case_id}")]
    TaskNotFound { case_id: String, task_id: String },

    #[error("case already exists: {0}")]
    DuplicateCase(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("resource unavailable: {resource_id} (requested {requested}, available {available})")]
    ResourceUnavailable {
        resource_id: String,
        requested: f64,
        available: f64,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("invalid condition on {target}: {reason}")]
    InvalidCondition { target: String, reason: String },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CaseNotFound(_) | Self::TaskNotFound { .. })
    }

    /// `DuplicateCase` is a specialised invalid-state error.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_) | Self::DuplicateCase(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
