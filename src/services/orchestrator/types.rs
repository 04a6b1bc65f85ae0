//! Public types for the orchestrator.
//!
//! Settings, lifecycle status and the events broadcast to subscribers.

use serde::Serialize;
use std::time::Duration;

use crate::domain::models::{Config, TaskId, TaskState, TaskType};

/// Runtime settings, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
    /// Deepest follow-up that will still be submitted.
    pub max_lineage_depth: u32,
    /// Retry cap given to derived follow-ups.
    pub follow_up_max_retries: u32,
    /// Refuse to build with unhandled stages.
    pub require_all_stages: bool,
    /// Linear backoff unit.
    pub backoff_unit: Duration,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.orchestrator.queue_capacity,
            max_lineage_depth: config.orchestrator.max_lineage_depth,
            follow_up_max_retries: config.orchestrator.follow_up_max_retries,
            require_all_stages: config.orchestrator.require_all_stages,
            backoff_unit: Duration::from_millis(config.retry.backoff_unit_ms),
            max_backoff: Duration::from_millis(config.retry.max_backoff_ms),
        }
    }
}

impl OrchestratorSettings {
    /// Delay before the attempt following retry number `retry_count`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(retry_count)
            .min(self.max_backoff)
    }
}

/// Lifecycle of the orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    /// Built; submissions queue up until started.
    Idle,
    /// Dispatch loop running.
    Running,
    /// Stopped; no further submissions accepted.
    Stopped,
}

/// Progress notifications broadcast by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// Task accepted and queued
    Submitted {
        /// Assigned id
        task_id: TaskId,
        /// Stage of the task
        task_type: TaskType,
        /// Task whose outcome produced this one
        parent_id: Option<TaskId>,
    },
    /// Attempt began
    Started {
        /// Task being attempted
        task_id: TaskId,
        /// Stage of the task
        task_type: TaskType,
        /// 1-based attempt number
        attempt: u32,
    },
    /// Attempt failed and another is scheduled
    Retrying {
        /// Task being retried
        task_id: TaskId,
        /// Retries used so far, including this one
        retry_count: u32,
        /// Delay before the task is re-enqueued
        backoff_ms: u64,
        /// Error of the failed attempt
        error: Option<String>,
    },
    /// Task reached a terminal state
    Completed {
        /// Finished task
        task_id: TaskId,
        /// Stage of the task
        task_type: TaskType,
        /// Terminal state
        state: TaskState,
        /// Final error, if any
        error: Option<String>,
    },
    /// Follow-up not submitted because of the lineage limit
    FollowUpSuppressed {
        /// Task whose follow-up was dropped
        parent_id: TaskId,
        /// Stage the follow-up would have run
        task_type: TaskType,
        /// Depth the follow-up would have had
        depth: u32,
    },
    /// Orchestrator shut down
    Stopped,
}

impl OrchestratorEvent {
    /// Task the event concerns, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Submitted { task_id, .. }
            | Self::Started { task_id, .. }
            | Self::Retrying { task_id, .. }
            | Self::Completed { task_id, .. } => Some(*task_id),
            Self::FollowUpSuppressed { .. } | Self::Stopped => None,
        }
    }
}
