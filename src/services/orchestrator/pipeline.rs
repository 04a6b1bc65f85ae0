//! Per-task execution: admission, handler dispatch, gates, retry and
//! follow-up derivation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use super::{Inner, OrchestratorEvent};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Decision, Task, TaskId, TaskResult, TaskState};
use crate::services::stage_transitions::next_tasks;

const ORCHESTRATOR_AGENT: &str = "orchestrator";

impl Inner {
    /// Run one attempt of a dequeued task.
    #[instrument(skip(self), fields(task_id = %id))]
    pub(super) async fn execute(self: Arc<Self>, id: TaskId) {
        if self.cancel.is_cancelled() {
            self.cancel_task(id, "orchestrator stopped before the task ran")
                .await;
            return;
        }

        let task = match self.store.transition(id, TaskState::Running).await {
            Ok(task) => task,
            Err(e) => {
                // Cancelled while queued, or already finished.
                debug!(error = %e, "task not runnable");
                return;
            }
        };
        let attempt = task.retry_count + 1;
        self.emit(OrchestratorEvent::Started {
            task_id: id,
            task_type: task.task_type,
            attempt,
        });
        info!(task_type = %task.task_type, attempt, "task started");

        let mut result = match self.run_attempt(&task).await {
            Ok(result) => result,
            Err(e) => {
                warn!(task_type = %task.task_type, error_kind = e.error_kind(), error = %e, "task rejected");
                self.finish(task, TaskResult::failure(id, e.to_string()))
                    .await;
                return;
            }
        };

        self.store.append_decisions(&result.decisions).await;

        if !result.success && self.cancel.is_cancelled() {
            result.state = TaskState::Cancelled;
        } else if !result.success && task.can_retry() {
            match self.begin_retry(result).await {
                Ok(backoff) => {
                    tokio::spawn(Arc::clone(&self).schedule_retry(id, backoff));
                    return;
                }
                Err(result) => {
                    self.finish(task, *result).await;
                    return;
                }
            }
        }

        self.finish(task, result).await;
    }

    /// Admission, handler dispatch and gate validation.
    ///
    /// `Err` is reserved for outcomes that must not be retried.
    async fn run_attempt(&self, task: &Task) -> DomainResult<TaskResult> {
        if !self.policy.allow_task(task) {
            return Err(DomainError::AdmissionDenied);
        }
        let handler = self
            .handlers
            .get(task.task_type)
            .ok_or(DomainError::NoHandler(task.task_type))?;

        let started = Instant::now();
        let mut result = handler.execute(&self.cancel, task).await;
        result.task_id = task.id;
        result.duration = started.elapsed();
        result.state = TaskState::from_success(result.success);

        if result.success {
            let failed = self.policy.failed_required_gates(&result);
            if !failed.is_empty() {
                warn!(task_id = %task.id, gates = ?failed, "required gates failed");
                result.mark_failed(DomainError::GateViolation(failed).to_string());
            }
        } else if result.error.is_none() {
            result.error = Some(
                DomainError::HandlerFailure(format!("{} handler reported failure", handler.name()))
                    .to_string(),
            );
        }
        Ok(result)
    }

    /// Record the failed attempt and move the task to Retrying, returning
    /// the backoff before the next attempt.
    ///
    /// Hands the result back when the store refuses the retry.
    async fn begin_retry(&self, result: TaskResult) -> Result<Duration, Box<TaskResult>> {
        let id = result.task_id;
        let error = result.error.clone();
        if let Err(e) = self.store.record_result(result.clone()).await {
            error!(task_id = %id, error = %e, "failed to record attempt result");
            return Err(Box::new(result));
        }
        let task = match self.store.begin_retry(id).await {
            Ok(task) => task,
            Err(e) => {
                error!(task_id = %id, error = %e, "failed to begin retry");
                return Err(Box::new(result));
            }
        };

        let backoff = self.settings.backoff_for(task.retry_count);
        let backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        warn!(
            task_id = %id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            backoff_ms,
            error = error.as_deref().unwrap_or(""),
            "task failed, retrying"
        );
        self.emit(OrchestratorEvent::Retrying {
            task_id: id,
            retry_count: task.retry_count,
            backoff_ms,
            error,
        });
        Ok(backoff)
    }

    /// Wait out the backoff, then put the task back on the queue.
    ///
    /// The send waits for capacity; shutdown during either wait cancels the
    /// task.
    async fn schedule_retry(self: Arc<Self>, id: TaskId, backoff: Duration) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.cancel_task(id, "orchestrator stopped during retry backoff").await;
                return;
            }
            () = tokio::time::sleep(backoff) => {}
        }

        let sent = {
            let _intake = self.intake.read().await;
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => false,
                sent = self.queue_tx.send(id) => sent.is_ok(),
            }
        };
        if sent {
            debug!(task_id = %id, "retry re-enqueued");
        } else {
            self.cancel_task(id, "orchestrator stopped before the retry ran")
                .await;
        }
    }

    /// Finalize a non-terminal task as Cancelled.
    pub(super) async fn cancel_task(&self, id: TaskId, reason: &str) {
        let mut result = TaskResult::failure(id, reason);
        result.state = TaskState::Cancelled;
        match self.store.finalize(result).await {
            Ok(task) => {
                self.emit(OrchestratorEvent::Completed {
                    task_id: id,
                    task_type: task.task_type,
                    state: TaskState::Cancelled,
                    error: Some(reason.to_string()),
                });
                info!(task_id = %id, reason, "task cancelled");
            }
            Err(e) => debug!(task_id = %id, error = %e, "task not cancellable"),
        }
    }

    /// Persist the final result, then derive and submit follow-ups.
    async fn finish(&self, task: Task, result: TaskResult) {
        let id = task.id;
        let state = result.state;
        let error = result.error.clone();

        let finished = match self.store.finalize(result.clone()).await {
            Ok(finished) => finished,
            Err(e) => {
                error!(task_id = %id, error = %e, "failed to finalize task");
                return;
            }
        };
        self.emit(OrchestratorEvent::Completed {
            task_id: id,
            task_type: finished.task_type,
            state,
            error: error.clone(),
        });

        match state {
            TaskState::Success => info!(
                task_id = %id,
                task_type = %finished.task_type,
                duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                "task succeeded"
            ),
            TaskState::Cancelled => {
                info!(task_id = %id, "task cancelled");
                return;
            }
            _ => warn!(
                task_id = %id,
                task_type = %finished.task_type,
                retries = finished.retry_count,
                error = error.as_deref().unwrap_or(""),
                "task failed"
            ),
        }

        self.submit_follow_ups(&finished, &result).await;
    }

    async fn submit_follow_ups(&self, task: &Task, result: &TaskResult) {
        for follow_up in next_tasks(task, result, self.settings.follow_up_max_retries) {
            let task_type = follow_up.task_type;

            if follow_up.depth > self.settings.max_lineage_depth {
                let decision = Decision::new(
                    ORCHESTRATOR_AGENT,
                    "suppress_follow_up",
                    format!(
                        "{task_type} follow-up of {} exceeds lineage depth {}",
                        task.id, self.settings.max_lineage_depth
                    ),
                    1.0,
                )
                .with_metadata("parent_id", serde_json::json!(task.id.value()))
                .with_metadata("depth", serde_json::json!(follow_up.depth));
                self.store.append_decisions(&[decision]).await;
                self.emit(OrchestratorEvent::FollowUpSuppressed {
                    parent_id: task.id,
                    task_type,
                    depth: follow_up.depth,
                });
                warn!(
                    parent_id = %task.id,
                    task_type = %task_type,
                    depth = follow_up.depth,
                    "follow-up suppressed at lineage limit"
                );
                continue;
            }

            match self.submit(follow_up).await {
                Ok(child) => debug!(parent_id = %task.id, task_id = %child, task_type = %task_type, "follow-up submitted"),
                Err(e) => {
                    warn!(parent_id = %task.id, task_type = %task_type, error = %e, "follow-up dropped");
                    let decision = Decision::new(
                        ORCHESTRATOR_AGENT,
                        "drop_follow_up",
                        format!("{task_type} follow-up of {} not submitted: {e}", task.id),
                        1.0,
                    )
                    .with_metadata("error_kind", serde_json::json!(e.error_kind()));
                    self.store.append_decisions(&[decision]).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::domain::models::{
        AgentContract, Config, Policy, StageOutput, Task, TaskInputs, TaskResult, TaskState,
        TaskType, TestOutput, TestReport,
    };
    use crate::domain::ports::StageHandler;
    use crate::services::handler_registry::HandlerRegistry;
    use crate::services::orchestrator::{Orchestrator, OrchestratorEvent};
    use crate::services::policy_engine::PolicyEngine;

    /// Fails `failures` times, then succeeds.
    struct Flaky {
        contract: AgentContract,
        failures: u32,
        calls: AtomicU32,
        output: StageOutput,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                contract: AgentContract::new("flaky", "Flaky"),
                failures,
                calls: AtomicU32::new(0),
                output: StageOutput::None,
            }
        }
    }

    #[async_trait]
    impl StageHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn contract(&self) -> &AgentContract {
            &self.contract
        }

        async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                TaskResult::failure(task.id, format!("attempt {} failed", call + 1))
            } else {
                TaskResult::new(task.id, true).with_output(self.output.clone())
            }
        }
    }

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.retry.backoff_unit_ms = 1;
        config.retry.max_backoff_ms = 5;
        config.orchestrator.require_all_stages = false;
        config
    }

    async fn started(registry: HandlerRegistry, policy: PolicyEngine) -> Orchestrator {
        let orchestrator = Orchestrator::builder()
            .config(quick_config())
            .policy_engine(policy)
            .handlers(registry)
            .build()
            .unwrap();
        orchestrator.start().await.unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let flaky = std::sync::Arc::new(Flaky::new(2));
        let registry = HandlerRegistry::new().with_handler(TaskType::Release, flaky.clone());
        let orchestrator = started(registry, PolicyEngine::new()).await;

        let id = orchestrator
            .submit(Task::new(TaskType::Release, "ship it").with_max_retries(3))
            .await
            .unwrap();
        assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

        let (task, result) = orchestrator.lookup(id).await;
        let task = task.unwrap();
        assert_eq!(task.state, TaskState::Success);
        assert_eq!(task.retry_count, 2);
        assert!(result.unwrap().success);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_keeps_last_error() {
        let flaky = std::sync::Arc::new(Flaky::new(10));
        let registry = HandlerRegistry::new().with_handler(TaskType::Release, flaky.clone());
        let orchestrator = started(registry, PolicyEngine::new()).await;

        let id = orchestrator
            .submit(Task::new(TaskType::Release, "ship it").with_max_retries(2))
            .await
            .unwrap();
        assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

        let (task, result) = orchestrator.lookup(id).await;
        let task = task.unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retry_count, 2);
        assert_eq!(result.unwrap().error.as_deref(), Some("attempt 3 failed"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_admission_denied_skips_handler_and_retry() {
        let flaky = std::sync::Arc::new(Flaky::new(0));
        let registry = HandlerRegistry::new().with_handler(TaskType::Release, flaky.clone());
        let mut policy = PolicyEngine::new();
        policy
            .add_policy(Policy::new("no-vendor", "No vendor").forbid_path("vendor/**"))
            .unwrap();
        let orchestrator = started(registry, policy).await;

        let task = Task::new(TaskType::Release, "ship it")
            .with_inputs(TaskInputs::with_files(["vendor/lib.go"]))
            .with_max_retries(3);
        let id = orchestrator.submit(task).await.unwrap();
        assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

        let (task, result) = orchestrator.lookup(id).await;
        assert_eq!(task.unwrap().retry_count, 0);
        assert_eq!(result.unwrap().error.as_deref(), Some("task blocked by policy"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_downgrades_reported_success() {
        let mut flaky = Flaky::new(0);
        flaky.output = StageOutput::Test(TestOutput {
            report: TestReport {
                passed: 9,
                failed: 1,
                coverage: 90.0,
                ..TestReport::default()
            },
        });
        let registry =
            HandlerRegistry::new().with_handler(TaskType::Release, std::sync::Arc::new(flaky));
        let orchestrator = started(registry, PolicyEngine::new()).await;

        let id = orchestrator
            .submit(Task::new(TaskType::Release, "ship it"))
            .await
            .unwrap();
        assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

        let result = orchestrator.result(id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.state, TaskState::Failed);
        assert!(result.error.unwrap().contains("tests-pass"));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let orchestrator = started(HandlerRegistry::new(), PolicyEngine::new()).await;
        let id = orchestrator
            .submit(Task::new(TaskType::Optimize, "speed up").with_max_retries(3))
            .await
            .unwrap();
        assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

        let (task, result) = orchestrator.lookup(id).await;
        assert_eq!(task.unwrap().state, TaskState::Failed);
        assert_eq!(
            result.unwrap().error.as_deref(),
            Some("no agent available for task type: optimize")
        );
    }

    #[tokio::test]
    async fn test_events_trace_retry_sequence() {
        let registry = HandlerRegistry::new()
            .with_handler(TaskType::Release, std::sync::Arc::new(Flaky::new(1)));
        let orchestrator = started(registry, PolicyEngine::new()).await;
        let mut events = orchestrator.subscribe();

        let id = orchestrator
            .submit(Task::new(TaskType::Release, "ship it").with_max_retries(1))
            .await
            .unwrap();
        assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.task_id() == Some(id) {
                seen.push(match event {
                    OrchestratorEvent::Submitted { .. } => "submitted",
                    OrchestratorEvent::Started { .. } => "started",
                    OrchestratorEvent::Retrying { .. } => "retrying",
                    OrchestratorEvent::Completed { .. } => "completed",
                    _ => "other",
                });
            }
        }
        assert_eq!(seen, ["submitted", "started", "retrying", "started", "completed"]);
    }
}
