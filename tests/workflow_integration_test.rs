//! End-to-end workflow tests.
//!
//! The built-in handlers run against a scripted workspace so every stage
//! transition is exercised without a Go toolchain.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pipewright::domain::models::{
    AuditFinding, AuditOutput, Config, FindingCategory, Severity, StageInput, StageOutput, Task,
    TaskResult, TaskState, TaskType,
};
use pipewright::{default_registry, HandlerContext, Orchestrator, OrchestratorEvent, Workspace};

use common::{go_project, quick_config, ScriptedHandler, ScriptedWorkspace};

const PASSING_RUN: &str = "\
=== RUN   TestLogin
--- PASS: TestLogin (0.00s)
PASS
ok  \tgithub.com/acme/app/src\t0.004s\tcoverage: 85.0% of statements";

const FAILING_RUN: &str = "\
=== RUN   TestLogin
--- FAIL: TestLogin (0.00s)
    login_test.go:9: undefined: Session
FAIL
FAIL\tgithub.com/acme/app/src\t0.004s";

fn workflow_config(max_lineage_depth: u32) -> Config {
    let mut config = quick_config();
    config.orchestrator.require_all_stages = true;
    config.orchestrator.max_lineage_depth = max_lineage_depth;
    config
}

async fn started(config: Config, workspace: Arc<ScriptedWorkspace>) -> Orchestrator {
    let ctx = HandlerContext::new(workspace as Arc<dyn Workspace>, &config);
    let orchestrator = Orchestrator::builder()
        .config(config)
        .handlers(default_registry(&ctx))
        .build()
        .unwrap();
    orchestrator.start().await.unwrap();
    orchestrator
}

#[tokio::test]
async fn test_fix_objective_runs_full_pipeline() {
    let project = go_project();
    let workspace = Arc::new(
        ScriptedWorkspace::new(project.path())
            .respond("go test -list", "TestLogin\nok  \tgithub.com/acme/app/src", 0)
            .respond("go test -bench", "BenchmarkLogin-8  1000000  1052 ns/op", 0)
            .respond("go test -coverprofile", "coverage: 85.0% of statements", 0)
            .respond("go test -v -cover", PASSING_RUN, 0),
    );
    let orchestrator = started(workflow_config(5), Arc::clone(&workspace)).await;

    let plan_id = orchestrator
        .submit(Task::new(TaskType::Plan, "fix bug in login"))
        .await
        .unwrap();
    assert!(orchestrator.wait_for_idle(Duration::from_secs(10)).await);

    let plan = orchestrator.task(plan_id).await.unwrap();
    assert_eq!(plan.state, TaskState::Success);

    let children = orchestrator.children_of(plan_id).await;
    let kinds: Vec<TaskType> = children.iter().map(|t| t.task_type).collect();
    assert_eq!(kinds, vec![TaskType::Code, TaskType::Test, TaskType::Audit]);
    assert_eq!(children[0].objective, "implement fix for: fix bug in login");
    assert!(children.windows(2).all(|w| w[0].id < w[1].id));

    // Code -> Test -> Audit -> Optimize -> Test -> ...
    let code_children = orchestrator.children_of(children[0].id).await;
    assert_eq!(code_children.len(), 1);
    assert_eq!(code_children[0].task_type, TaskType::Test);
    let audit_children = orchestrator.children_of(children[2].id).await;
    assert_eq!(audit_children.len(), 1);
    assert_eq!(audit_children[0].task_type, TaskType::Optimize);

    let tasks = orchestrator.all_tasks().await;
    assert!(tasks.iter().all(|t| t.state == TaskState::Success));
    assert!(tasks.iter().all(|t| t.depth <= 5));

    let decisions = orchestrator.decisions().await;
    assert!(decisions.iter().any(|d| d.action == "suppress_follow_up"));
    assert!(decisions.iter().any(|d| d.agent == "planner"));

    let stats = orchestrator.stats().await;
    assert_eq!(stats.total, tasks.len());
    assert_eq!(stats.succeeded, tasks.len());
    assert!(workspace.count("go vet") >= 1);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_failing_tests_alternate_with_repairs() {
    let project = go_project();
    let workspace = Arc::new(
        ScriptedWorkspace::new(project.path()).respond("go test -v -cover", FAILING_RUN, 1),
    );
    let orchestrator = started(workflow_config(3), Arc::clone(&workspace)).await;

    let root = orchestrator
        .submit(Task::new(TaskType::Test, "execute test suite"))
        .await
        .unwrap();
    assert!(orchestrator.wait_for_idle(Duration::from_secs(10)).await);

    let (task, result) = orchestrator.lookup(root).await;
    assert_eq!(task.unwrap().state, TaskState::Failed);
    assert_eq!(result.unwrap().error.as_deref(), Some("1 test(s) failed"));

    let chain: Vec<(TaskType, u32)> = orchestrator
        .all_tasks()
        .await
        .iter()
        .map(|t| (t.task_type, t.depth))
        .collect();
    assert_eq!(
        chain,
        vec![
            (TaskType::Test, 0),
            (TaskType::Repair, 1),
            (TaskType::Test, 2),
            (TaskType::Repair, 3),
        ]
    );

    let repair = &orchestrator.children_of(root).await[0];
    let StageInput::TestFailure { result } = &repair.inputs.upstream else {
        panic!("repair should carry the failed test result");
    };
    assert_eq!(result.output.test_report().map(|r| r.failed), Some(1));

    let repair_result = orchestrator.result(repair.id).await.unwrap();
    let StageOutput::Repair(output) = &repair_result.output else {
        panic!("expected repair output");
    };
    assert_eq!(output.strategy, "repair_1_failures");
    assert!(output.applied_fixes.contains(&"add missing definitions".to_string()));

    assert!(orchestrator
        .decisions()
        .await
        .iter()
        .any(|d| d.action == "suppress_follow_up"));
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_audit_with_critical_findings_spawns_repair_even_on_success() {
    let auditor = ScriptedHandler::new(|task, _| {
        let finding = AuditFinding::new(
            "SEC-1",
            Severity::Critical,
            FindingCategory::Security,
            "dangerous_pattern",
            "use of eval",
        );
        TaskResult::new(task.id, true)
            .with_output(StageOutput::Audit(AuditOutput::from_findings(vec![finding])))
    });
    // A failed repair spawns nothing, so the workflow ends there.
    let repairer = ScriptedHandler::failing("repair declined");
    let optimizer = ScriptedHandler::succeeding();

    let orchestrator = Orchestrator::builder()
        .config(quick_config())
        .handler(TaskType::Audit, auditor)
        .handler(TaskType::Repair, repairer.clone())
        .handler(TaskType::Optimize, optimizer.clone())
        .build()
        .unwrap();
    orchestrator.start().await.unwrap();

    let audit = orchestrator
        .submit(Task::new(TaskType::Audit, "audit code changes"))
        .await
        .unwrap();
    assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);

    assert_eq!(orchestrator.task(audit).await.unwrap().state, TaskState::Success);
    let children = orchestrator.children_of(audit).await;
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].task_type, TaskType::Repair);
    assert!(matches!(
        children[0].inputs.upstream,
        StageInput::AuditFindings { .. }
    ));
    assert_eq!(repairer.calls(), 1);
    assert_eq!(optimizer.calls(), 0);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_events_follow_task_lifecycle() {
    let orchestrator = Orchestrator::builder()
        .config(quick_config())
        .handler(TaskType::Release, ScriptedHandler::succeeding())
        .build()
        .unwrap();
    let mut events = orchestrator.subscribe();
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit(Task::new(TaskType::Release, "ship it"))
        .await
        .unwrap();
    assert!(orchestrator.wait_for_idle(Duration::from_secs(5)).await);
    orchestrator.stop().await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            OrchestratorEvent::Submitted {
                task_id: id,
                task_type: TaskType::Release,
                parent_id: None,
            },
            OrchestratorEvent::Started {
                task_id: id,
                task_type: TaskType::Release,
                attempt: 1,
            },
            OrchestratorEvent::Completed {
                task_id: id,
                task_type: TaskType::Release,
                state: TaskState::Success,
                error: None,
            },
            OrchestratorEvent::Stopped,
        ]
    );
}
