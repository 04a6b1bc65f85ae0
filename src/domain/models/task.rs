//! Task domain model.
//!
//! A task is one stage of the workflow (plan, code, test, ...). Follow-up
//! tasks reference the task that spawned them, so tasks form a tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::result::TaskResult;

/// Store-assigned task identifier, rendered as `task-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Placeholder carried by tasks that have not been submitted yet.
    pub const UNASSIGNED: Self = Self(0);

    /// Wrap a raw id.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw numeric value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// False for tasks not yet submitted.
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().strip_prefix("task-").unwrap_or_else(|| s.trim());
        digits
            .parse::<u64>()
            .ok()
            .filter(|n| *n != 0)
            .map(Self)
            .ok_or_else(|| DomainError::ValidationFailed(format!("invalid task id: {s}")))
    }
}

/// Workflow stage a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Decompose an objective into stage tasks
    Plan,
    /// Change code
    Code,
    /// Run the test suite
    Test,
    /// Static and security audit
    Audit,
    /// Fix failing tests or findings
    Repair,
    /// Behavior-preserving optimization
    Optimize,
    /// Package, version or deploy
    Release,
}

impl TaskType {
    /// Every stage, in workflow order.
    pub const ALL: [Self; 7] = [
        Self::Plan,
        Self::Code,
        Self::Test,
        Self::Audit,
        Self::Repair,
        Self::Optimize,
        Self::Release,
    ];

    /// Lowercase stage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Code => "code",
            Self::Test => "test",
            Self::Audit => "audit",
            Self::Repair => "repair",
            Self::Optimize => "optimize",
            Self::Release => "release",
        }
    }

    /// Parse a lowercase stage name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plan" => Some(Self::Plan),
            "code" => Some(Self::Code),
            "test" => Some(Self::Test),
            "audit" => Some(Self::Audit),
            "repair" => Some(Self::Repair),
            "optimize" => Some(Self::Optimize),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted and waiting in the queue
    #[default]
    Pending,
    /// An attempt is executing
    Running,
    /// Finished successfully
    Success,
    /// Finished unsuccessfully
    Failed,
    /// Waiting out the backoff before the next attempt
    Retrying,
    /// Abandoned because the orchestrator stopped
    Cancelled,
}

impl TaskState {
    /// Lowercase state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this state.
    ///
    /// Only Retrying loops back to Running; nothing ever returns to Pending.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled],
            Self::Running => &[Self::Success, Self::Failed, Self::Retrying, Self::Cancelled],
            Self::Retrying => &[Self::Running, Self::Cancelled],
            Self::Success | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Whether the state machine permits moving to `new_state`.
    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }

    /// Terminal state matching a success flag.
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream context handed to a task by the stage that spawned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageInput {
    /// No upstream context
    #[default]
    None,
    /// The previous stage completed; only its id is carried.
    Predecessor {
        /// Completed predecessor
        task_id: TaskId,
    },
    /// A failing test run that should be repaired.
    TestFailure {
        /// Result of the failed test task
        result: Box<TaskResult>,
    },
    /// An audit that produced critical findings.
    AuditFindings {
        /// Result of the audit task
        result: Box<TaskResult>,
    },
}

/// Inputs of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInputs {
    /// Repository-relative paths the task touches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Context from the spawning stage
    #[serde(default)]
    pub upstream: StageInput,
}

impl TaskInputs {
    /// Inputs naming the files a task touches.
    pub fn with_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            upstream: StageInput::None,
        }
    }
}

/// Free-form constraints attached to a task.
pub type Constraints = BTreeMap<String, serde_json::Value>;

/// A unit of work executed by a stage handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, assigned on submission
    pub id: TaskId,
    /// Workflow stage
    pub task_type: TaskType,
    /// Current lifecycle state
    pub state: TaskState,
    /// What the stage should achieve
    pub objective: String,
    /// Typed inputs
    pub inputs: TaskInputs,
    /// Free-form constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: Constraints,
    /// When submitted
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempts made beyond the first
    pub retry_count: u32,
    /// Maximum retries
    pub max_retries: u32,
    /// Task whose outcome spawned this one
    pub parent_id: Option<TaskId>,
    /// Distance from the root of the task tree
    pub depth: u32,
}

impl Task {
    /// Create an unsubmitted task.
    pub fn new(task_type: TaskType, objective: impl Into<String>) -> Self {
        Self {
            id: TaskId::UNASSIGNED,
            task_type,
            state: TaskState::default(),
            objective: objective.into(),
            inputs: TaskInputs::default(),
            constraints: Constraints::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 0,
            parent_id: None,
            depth: 0,
        }
    }

    /// Make this task a follow-up of `parent`.
    pub fn with_parent(mut self, parent: &Task) -> Self {
        self.parent_id = Some(parent.id);
        self.depth = parent.depth + 1;
        self
    }

    /// Set the retry cap.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the inputs.
    pub fn with_inputs(mut self, inputs: TaskInputs) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the upstream context.
    pub fn with_upstream(mut self, upstream: StageInput) -> Self {
        self.inputs.upstream = upstream;
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.constraints.insert(key.into(), value);
        self
    }

    /// Check if can transition to given state.
    pub fn can_transition_to(&self, new_state: TaskState) -> bool {
        self.state.can_transition_to(new_state)
    }

    /// Transition to a new state, stamping timestamps.
    pub fn transition_to(&mut self, new_state: TaskState) -> DomainResult<()> {
        if !self.can_transition_to(new_state) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        match new_state {
            TaskState::Running => self.started_at = Some(Utc::now()),
            TaskState::Success | TaskState::Failed | TaskState::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskState::Pending | TaskState::Retrying => {}
        }
        Ok(())
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Count another attempt and move to Retrying.
    pub fn begin_retry(&mut self) -> DomainResult<()> {
        if !self.can_retry() {
            return Err(DomainError::ValidationFailed(format!(
                "{} has exhausted its {} retries",
                self.id, self.max_retries
            )));
        }
        self.transition_to(TaskState::Retrying)?;
        self.retry_count += 1;
        Ok(())
    }

    /// Validate a task before submission.
    pub fn validate(&self) -> DomainResult<()> {
        if self.objective.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task objective cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
