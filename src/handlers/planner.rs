//! Plan stage: decomposes an objective into stage tasks.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{
    AgentContract, Decision, PlanOutput, StageOutput, Task, TaskResult, TaskType,
};
use crate::domain::ports::StageHandler;

const FIX_KEYWORDS: &[&str] = &["fix", "bug", "repair", "arreglar"];
const OPTIMIZE_KEYWORDS: &[&str] = &["optimize", "performance", "slow", "lento"];

/// Keyword-driven planner. Runs no tools.
#[derive(Debug, Clone)]
pub struct Planner {
    contract: AgentContract,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    /// Planner with its contract.
    pub fn new() -> Self {
        Self {
            contract: AgentContract::new("planner", "Planner"),
        }
    }

    /// Subtasks for `task`, in submission order.
    ///
    /// Fix and optimize keywords each add their own code work; an objective
    /// with neither gets one code task for the objective itself. The plan
    /// always ends with a test run and an audit.
    pub fn decompose(&self, task: &Task) -> Vec<Task> {
        let objective = task.objective.as_str();
        let lowered = objective.to_lowercase();
        let mentions = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        let subtask = |task_type: TaskType, objective: String, max_retries: u32| {
            let mut subtask = Task::new(task_type, objective)
                .with_parent(task)
                .with_max_retries(max_retries);
            subtask.constraints = task.constraints.clone();
            subtask
        };
        let with_inputs = |subtask: Task| subtask.with_inputs(task.inputs.clone());

        let mut subtasks = Vec::new();
        if mentions(FIX_KEYWORDS) {
            subtasks.push(with_inputs(subtask(
                TaskType::Code,
                format!("implement fix for: {objective}"),
                3,
            )));
        }
        if mentions(OPTIMIZE_KEYWORDS) {
            subtasks.push(with_inputs(subtask(
                TaskType::Code,
                format!("analyze and optimize: {objective}"),
                3,
            )));
            subtasks.push(with_inputs(subtask(
                TaskType::Optimize,
                format!("apply optimizations for: {objective}"),
                2,
            )));
        }
        if subtasks.is_empty() {
            subtasks.push(with_inputs(subtask(TaskType::Code, objective.to_string(), 3)));
        }

        subtasks.push(subtask(TaskType::Test, "execute test suite".to_string(), 2));
        subtasks.push(subtask(TaskType::Audit, "audit code changes".to_string(), 1));
        subtasks
    }
}

#[async_trait]
impl StageHandler for Planner {
    fn name(&self) -> &'static str {
        "planner"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let subtasks = self.decompose(task);
        let decision = Decision::new(
            "planner",
            "plan",
            "decomposing objective into subtasks",
            0.9,
        )
        .with_metadata("plan_count", serde_json::json!(subtasks.len()));

        TaskResult::new(task.id, true)
            .with_output(StageOutput::Plan(PlanOutput { subtasks }))
            .with_decision(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TaskId, TaskInputs};

    fn plan(objective: &str) -> Task {
        let mut task = Task::new(TaskType::Plan, objective)
            .with_inputs(TaskInputs::with_files(["src/auth.go"]));
        task.id = TaskId::new(1);
        task
    }

    fn summary(tasks: &[Task]) -> Vec<(TaskType, &str, u32)> {
        tasks
            .iter()
            .map(|t| (t.task_type, t.objective.as_str(), t.max_retries))
            .collect()
    }

    #[test]
    fn test_fix_objective() {
        let subtasks = Planner::new().decompose(&plan("fix bug in user authentication"));
        assert_eq!(
            summary(&subtasks),
            vec![
                (TaskType::Code, "implement fix for: fix bug in user authentication", 3),
                (TaskType::Test, "execute test suite", 2),
                (TaskType::Audit, "audit code changes", 1),
            ]
        );
        assert!(subtasks.iter().all(|t| t.parent_id == Some(TaskId::new(1))));
        assert!(subtasks.iter().all(|t| t.depth == 1));
        assert_eq!(subtasks[0].inputs.files, vec!["src/auth.go"]);
        assert!(subtasks[1].inputs.files.is_empty());
    }

    #[test]
    fn test_optimize_objective() {
        let subtasks = Planner::new().decompose(&plan("Endpoint is SLOW"));
        assert_eq!(
            summary(&subtasks),
            vec![
                (TaskType::Code, "analyze and optimize: Endpoint is SLOW", 3),
                (TaskType::Optimize, "apply optimizations for: Endpoint is SLOW", 2),
                (TaskType::Test, "execute test suite", 2),
                (TaskType::Audit, "audit code changes", 1),
            ]
        );
    }

    #[test]
    fn test_fix_and_optimize_combine() {
        let subtasks = Planner::new().decompose(&plan("fix slow query"));
        let types: Vec<TaskType> = subtasks.iter().map(|t| t.task_type).collect();
        assert_eq!(
            types,
            vec![
                TaskType::Code,
                TaskType::Code,
                TaskType::Optimize,
                TaskType::Test,
                TaskType::Audit
            ]
        );
    }

    #[test]
    fn test_plain_objective() {
        let subtasks = Planner::new().decompose(&plan("add logout endpoint"));
        assert_eq!(summary(&subtasks)[0], (TaskType::Code, "add logout endpoint", 3));
        assert_eq!(subtasks.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_reports_plan() {
        let task = plan("fix bug");
        let result = Planner::new()
            .execute(&CancellationToken::new(), &task)
            .await;
        assert!(result.success);
        assert_eq!(result.output.subtasks().map(<[Task]>::len), Some(3));
        assert_eq!(result.decisions[0].agent, "planner");
        assert!((result.decisions[0].confidence - 0.9).abs() < f64::EPSILON);
    }
}
