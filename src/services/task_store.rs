//! Canonical store for tasks, results and the decision log.
//!
//! All three live behind one reader/writer lock. Callers only ever get
//! clones; the maps themselves never leave this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use chrono::Utc;
use serde::Serialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Decision, Task, TaskId, TaskResult, TaskState};

#[derive(Debug, Default)]
struct StoreInner {
    tasks: HashMap<TaskId, Task>,
    results: HashMap<TaskId, TaskResult>,
    decisions: Vec<Decision>,
}

/// Per-state task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Every task ever inserted
    pub total: usize,
    /// Waiting in the queue
    pub pending: usize,
    /// Attempt in progress
    pub running: usize,
    /// Waiting out a backoff
    pub retrying: usize,
    /// Finished successfully
    pub succeeded: usize,
    /// Finished with an error
    pub failed: usize,
    /// Stopped before finishing
    pub cancelled: usize,
}

impl StoreStats {
    /// Tasks that have not reached a terminal state.
    pub fn active(&self) -> usize {
        self.pending + self.running + self.retrying
    }

    fn count(&mut self, state: TaskState) {
        self.total += 1;
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Retrying => self.retrying += 1,
            TaskState::Success => self.succeeded += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }
}

/// In-memory task store.
#[derive(Debug)]
pub struct TaskStore {
    next_id: AtomicU64,
    inner: RwLock<StoreInner>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    /// Empty store; ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Assign an id, reset the task to Pending and make it visible.
    ///
    /// The id is drawn and the task inserted under the same write lock.
    pub async fn insert(&self, mut task: Task) -> Task {
        let mut inner = self.inner.write().await;
        task.id = TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        task.state = TaskState::Pending;
        task.retry_count = 0;
        task.created_at = Utc::now();
        task.started_at = None;
        task.completed_at = None;
        inner.tasks.insert(task.id, task.clone());
        task
    }

    /// Task and result for `id`, either of which may be absent.
    pub async fn lookup(&self, id: TaskId) -> (Option<Task>, Option<TaskResult>) {
        let inner = self.inner.read().await;
        (inner.tasks.get(&id).cloned(), inner.results.get(&id).cloned())
    }

    /// Current task record.
    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.read().await.tasks.get(&id).cloned()
    }

    /// Latest recorded result.
    pub async fn result(&self, id: TaskId) -> Option<TaskResult> {
        self.inner.read().await.results.get(&id).cloned()
    }

    /// Move a task to `to`, enforcing the state machine.
    pub async fn transition(&self, id: TaskId, to: TaskState) -> DomainResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(DomainError::TaskNotFound(id))?;
        task.transition_to(to)?;
        Ok(task.clone())
    }

    /// Count a retry and move the task to Retrying.
    pub async fn begin_retry(&self, id: TaskId) -> DomainResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(DomainError::TaskNotFound(id))?;
        task.begin_retry()?;
        Ok(task.clone())
    }

    /// Store the result for an existing task, replacing any earlier one.
    pub async fn record_result(&self, result: TaskResult) -> DomainResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&result.task_id) {
            return Err(DomainError::TaskNotFound(result.task_id));
        }
        inner.results.insert(result.task_id, result);
        Ok(())
    }

    /// Move the task to the result's state and record the result atomically.
    pub async fn finalize(&self, result: TaskResult) -> DomainResult<Task> {
        let mut inner = self.inner.write().await;
        let id = result.task_id;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or(DomainError::TaskNotFound(id))?;
        task.transition_to(result.state)?;
        let snapshot = task.clone();
        inner.results.insert(id, result);
        Ok(snapshot)
    }

    /// Append to the decision log.
    pub async fn append_decisions(&self, decisions: &[Decision]) {
        if decisions.is_empty() {
            return;
        }
        self.inner
            .write()
            .await
            .decisions
            .extend_from_slice(decisions);
    }

    /// Snapshot of the decision log, oldest first.
    pub async fn decisions(&self) -> Vec<Decision> {
        self.inner.read().await.decisions.clone()
    }

    /// Direct follow-ups of `id`, in submission order.
    pub async fn children_of(&self, id: TaskId) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut children: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.parent_id == Some(id))
            .cloned()
            .collect();
        children.sort_by_key(|t| t.id);
        children
    }

    /// Every task, in submission order.
    pub async fn all_tasks(&self) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Counts by state.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        inner.tasks.values().fold(StoreStats::default(), |mut stats, t| {
            stats.count(t.state);
            stats
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskType;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = TaskStore::new();
        let a = store.insert(Task::new(TaskType::Plan, "a")).await;
        let b = store.insert(Task::new(TaskType::Code, "b")).await;
        assert_eq!(a.id, TaskId::new(1));
        assert_eq!(b.id, TaskId::new(2));
        assert_eq!(a.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn test_insert_clears_carried_over_retries() {
        let store = TaskStore::new();
        let mut task = Task::new(TaskType::Test, "execute test suite").with_max_retries(1);
        task.retry_count = 7;
        task.state = TaskState::Retrying;

        let stored = store.insert(task).await;
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.state, TaskState::Pending);
        assert_eq!(store.task(stored.id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_distinct_ids() {
        let store = Arc::new(TaskStore::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.insert(Task::new(TaskType::Test, format!("t{i}"))).await.id
            }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 64);
    }

    #[tokio::test]
    async fn test_record_result_rejects_unknown_task() {
        let store = TaskStore::new();
        let err = store
            .record_result(TaskResult::new(TaskId::new(99), true))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(id) if id == TaskId::new(99)));
    }

    #[tokio::test]
    async fn test_finalize_sets_state_and_result() {
        let store = TaskStore::new();
        let task = store.insert(Task::new(TaskType::Code, "c")).await;
        store.transition(task.id, TaskState::Running).await.unwrap();
        let done = store
            .finalize(TaskResult::failure(task.id, "compile error"))
            .await
            .unwrap();
        assert_eq!(done.state, TaskState::Failed);
        assert!(done.completed_at.is_some());

        let (task, result) = store.lookup(task.id).await;
        assert_eq!(task.unwrap().state, TaskState::Failed);
        assert_eq!(result.unwrap().error.as_deref(), Some("compile error"));
    }

    #[tokio::test]
    async fn test_transition_enforces_state_machine() {
        let store = TaskStore::new();
        let task = store.insert(Task::new(TaskType::Audit, "a")).await;
        assert!(store.transition(task.id, TaskState::Success).await.is_err());
        assert!(store
            .transition(TaskId::new(42), TaskState::Running)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_children_and_stats() {
        let store = TaskStore::new();
        let parent = store.insert(Task::new(TaskType::Plan, "p")).await;
        store
            .insert(Task::new(TaskType::Code, "c").with_parent(&parent))
            .await;
        store
            .insert(Task::new(TaskType::Test, "t").with_parent(&parent))
            .await;
        store.transition(parent.id, TaskState::Running).await.unwrap();

        let children = store.children_of(parent.id).await;
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].task_type, TaskType::Code);

        let stats = store.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.active(), 3);
    }

    #[tokio::test]
    async fn test_decision_log_is_append_only() {
        let store = TaskStore::new();
        store
            .append_decisions(&[Decision::new("planner", "plan", "decompose", 0.9)])
            .await;
        store
            .append_decisions(&[Decision::new("coder", "code", "implement", 0.8)])
            .await;
        let log = store.decisions().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].agent, "planner");
        assert_eq!(log[1].agent, "coder");
    }
}
