//! Domain errors for the pipewright workflow engine.

use thiserror::Error;

use crate::domain::models::{TaskId, TaskState, TaskType};

fn format_task_types(types: &[TaskType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Domain-level errors that can occur while orchestrating a workflow.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An enabled policy forbids a path the task references
    #[error("task blocked by policy")]
    AdmissionDenied,

    /// No handler is registered for the task type
    #[error("no agent available for task type: {0}")]
    NoHandler(TaskType),

    /// The handler reported failure
    #[error("{0}")]
    HandlerFailure(String),

    /// Required gates rejected a successful result
    #[error("result failed policy validation: {}", .0.join(", "))]
    GateViolation(Vec<String>),

    /// The bounded queue is saturated
    #[error("task queue full")]
    QueueFull,

    /// The orchestrator no longer accepts work
    #[error("orchestrator is stopped")]
    OrchestratorStopped,

    /// No task with this id
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// The state machine refused a transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state
        from: TaskState,
        /// Requested state
        to: TaskState,
    },

    /// Stage types without a handler at build time
    #[error("No stage handler registered for: {}", format_task_types(.0))]
    MissingHandlers(Vec<TaskType>),

    /// A glob or regex failed to compile
    #[error("Invalid pattern '{id}': {reason}")]
    InvalidPattern {
        /// Pattern id or the offending glob
        id: String,
        /// Compiler message
        reason: String,
    },

    /// Malformed input
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl DomainError {
    /// Stable snake_case tag for the error kind.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AdmissionDenied => "admission_denied",
            Self::NoHandler(_) => "no_handler",
            Self::HandlerFailure(_) => "handler_failure",
            Self::GateViolation(_) => "gate_violation",
            Self::QueueFull => "queue_full",
            Self::OrchestratorStopped => "orchestrator_stopped",
            Self::TaskNotFound(_) => "task_not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::MissingHandlers(_) => "missing_handlers",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::ValidationFailed(_) => "validation_failed",
        }
    }
}

/// Result alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<regex::Error> for DomainError {
    fn from(err: regex::Error) -> Self {
        DomainError::InvalidPattern {
            id: String::from("<anonymous>"),
            reason: err.to_string(),
        }
    }
}
