//! Optimize stage: benchmarks, applies behavior-preserving rewrites and
//! checks the suite still passes.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{command_evidence, run_or_report, HandlerContext};
use crate::domain::models::{
    AgentContract, Decision, EvidenceKind, OptimizeOutput, StageOutput, Task, TaskResult,
};
use crate::domain::ports::StageHandler;
use crate::services::tool_runner::ToolRunner;

/// Rewrites that cannot change behavior.
const SAFE: &[&str] = &["remove_unused_imports", "simplify_expressions", "reduce_allocations"];

/// Rewrites only attempted when the repository has tests.
const NEEDS_TESTS: &[&str] = &["optimize_loops", "cache_results"];

/// Applies safe optimizations between two benchmark runs.
pub struct Optimizer {
    ctx: HandlerContext,
    contract: AgentContract,
    runner: ToolRunner,
}

/// Candidate optimizations for an objective, most specific first.
pub fn identify_optimizations(objective: &str) -> Vec<&'static str> {
    let lowered = objective.to_lowercase();
    let mut found = Vec::new();
    if lowered.contains("slow") || lowered.contains("performance") {
        found.extend(["optimize_loops", "reduce_allocations", "cache_results"]);
    }
    found.extend(["remove_unused_imports", "simplify_expressions"]);
    found
}

impl Optimizer {
    /// Optimizer over the shared context.
    pub fn new(ctx: HandlerContext) -> Self {
        let contract = AgentContract::new("optimizer", "Optimizer")
            .with_allowed_paths(&["src/**", "cmd/**", "internal/**", "pkg/**"])
            .with_tools(&["go", "go test", "goimports"])
            .requiring_tests();
        let runner = ctx.runner(&contract);
        Self {
            ctx,
            contract,
            runner,
        }
    }

    async fn benchmark(&self) -> String {
        run_or_report(&self.runner, &self.ctx.commands.bench)
            .await
            .output
    }

    async fn has_tests(&self) -> bool {
        run_or_report(&self.runner, &self.ctx.commands.list_tests)
            .await
            .output
            .contains("Test")
    }

    async fn is_safe(&self, optimization: &str, has_tests: &mut Option<bool>) -> bool {
        if SAFE.contains(&optimization) {
            return true;
        }
        if NEEDS_TESTS.contains(&optimization) {
            if has_tests.is_none() {
                *has_tests = Some(self.has_tests().await);
            }
            return has_tests.unwrap_or(false);
        }
        false
    }

    /// Apply one rewrite; `false` when there is no tool for it.
    async fn apply(&self, optimization: &str) -> bool {
        let spec = match optimization {
            "remove_unused_imports" => &self.ctx.commands.imports,
            "simplify_expressions" => &self.ctx.commands.fmt,
            _ => return false,
        };
        let out = run_or_report(&self.runner, spec).await;
        if !out.success() {
            debug!(optimization, output = %out.output, "optimization tool failed");
        }
        out.success()
    }
}

#[async_trait]
impl StageHandler for Optimizer {
    fn name(&self) -> &'static str {
        "optimizer"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let decision = Decision::new("optimizer", "optimize", "analyzing and optimizing code", 0.7);
        let benchmark_before = self.benchmark().await;

        let mut has_tests = None;
        let mut applied = Vec::new();
        for optimization in identify_optimizations(&task.objective) {
            if self.is_safe(optimization, &mut has_tests).await && self.apply(optimization).await {
                applied.push(optimization.to_string());
            }
        }

        let test = &self.ctx.commands.test;
        let test_out = run_or_report(&self.runner, test).await;
        let tests_still_pass = test_out.exit_code.is_some() && !test_out.output.contains("FAIL");

        let benchmark_after = self.benchmark().await;

        let mut result = TaskResult::new(task.id, tests_still_pass && !applied.is_empty())
            .with_decision(decision.with_metadata("applied", serde_json::json!(applied)));
        if !tests_still_pass {
            result = result
                .with_evidence(command_evidence(EvidenceKind::Report, test, &test_out))
                .with_error("tests fail after optimization");
        } else if applied.is_empty() {
            result = result.with_error("no optimizations applied");
        }
        result.with_output(StageOutput::Optimize(OptimizeOutput {
            optimizations: applied,
            benchmark_before,
            benchmark_after,
            tests_still_pass,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, TaskType};
    use crate::handlers::testing::FakeWorkspace;
    use std::sync::Arc;

    fn optimizer(ws: FakeWorkspace) -> (Optimizer, Arc<FakeWorkspace>) {
        let ws = Arc::new(ws);
        (
            Optimizer::new(HandlerContext::new(ws.clone(), &Config::default())),
            ws,
        )
    }

    #[test]
    fn test_identify_optimizations() {
        assert_eq!(
            identify_optimizations("Endpoint is SLOW"),
            vec![
                "optimize_loops",
                "reduce_allocations",
                "cache_results",
                "remove_unused_imports",
                "simplify_expressions",
            ]
        );
        assert_eq!(
            identify_optimizations("tidy up"),
            vec!["remove_unused_imports", "simplify_expressions"]
        );
    }

    #[tokio::test]
    async fn test_applies_tool_backed_rewrites() {
        let (optimizer, ws) = optimizer(
            FakeWorkspace::new("/repo")
                .respond("go test -bench", "BenchmarkLogin 1000 ns/op", 0)
                .respond("go test -list", "TestLogin\nok", 0),
        );
        let task = Task::new(TaskType::Optimize, "apply optimizations for: slow login");
        let result = optimizer.execute(&CancellationToken::new(), &task).await;

        assert!(result.success);
        let StageOutput::Optimize(out) = &result.output else {
            panic!("expected optimize output");
        };
        assert_eq!(
            out.optimizations,
            vec!["remove_unused_imports", "simplify_expressions"]
        );
        assert!(out.tests_still_pass);
        assert_eq!(out.benchmark_before, "BenchmarkLogin 1000 ns/op");
        assert!(ws.ran("goimports -w ."));
        assert_eq!(
            ws.calls().iter().filter(|c| c.starts_with("go test -list")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_regression_fails_the_stage() {
        let (optimizer, _) = optimizer(
            FakeWorkspace::new("/repo").respond("go test -v", "--- FAIL: TestLogin", 1),
        );
        let result = optimizer
            .execute(&CancellationToken::new(), &Task::new(TaskType::Optimize, "tidy"))
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("tests fail after optimization"));
        let StageOutput::Optimize(out) = &result.output else {
            panic!("expected optimize output");
        };
        assert!(!out.tests_still_pass);
    }

    #[tokio::test]
    async fn test_nothing_applied_fails() {
        let (optimizer, _) = optimizer(
            FakeWorkspace::new("/repo")
                .respond("goimports", "not installed", 127)
                .respond("go fmt", "syntax error", 2),
        );
        let result = optimizer
            .execute(&CancellationToken::new(), &Task::new(TaskType::Optimize, "tidy"))
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no optimizations applied"));
    }
}
