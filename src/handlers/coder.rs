//! Code stage: prepares a work branch and collects the files a change touches.

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{command_evidence, glob_root, list_files, run_or_report, HandlerContext};
use crate::domain::models::{
    AgentContract, CodeOutput, Decision, Evidence, EvidenceKind, RiskLevel, StageOutput, Task,
    TaskResult,
};
use crate::domain::ports::StageHandler;
use crate::services::tool_runner::ToolRunner;

/// Files picked up per allowed root when scanning the repository.
const FILES_PER_ROOT: usize = 3;

/// Cuts a work branch, picks candidate files and formats them.
pub struct Coder {
    ctx: HandlerContext,
    contract: AgentContract,
    runner: ToolRunner,
}

impl Coder {
    /// Coder over the shared context.
    pub fn new(ctx: HandlerContext) -> Self {
        let contract = AgentContract::new("coder", "Coder")
            .with_allowed_paths(&["src/**", "cmd/**", "internal/**", "pkg/**"])
            .with_forbidden_paths(&["**/*_test.go", "vendor/**"])
            .with_tools(&["go", "git"])
            .requiring_tests();
        let runner = ctx.runner(&contract);
        Self {
            ctx,
            contract,
            runner,
        }
    }

    /// Input files first, then a few files from each allowed root.
    fn candidate_files(&self, task: &Task) -> Vec<String> {
        let root = self.ctx.workspace.repo_path();
        let mut files = task.inputs.files.clone();
        for glob in &self.contract.allowed_paths {
            if let Some(dir) = glob_root(glob) {
                files.extend(list_files(root, &root.join(dir), FILES_PER_ROOT));
            }
        }
        let mut seen = std::collections::HashSet::new();
        files.retain(|f| seen.insert(f.clone()));
        files
    }

    /// Candidates the contract permits and that exist in the repository.
    fn changed_files(&self, task: &Task) -> Vec<String> {
        let root = self.ctx.workspace.repo_path();
        self.candidate_files(task)
            .into_iter()
            .filter(|file| {
                if !self.validate_path(file) {
                    debug!(file = %file, "skipping file outside the coder contract");
                    return false;
                }
                root.join(file).is_file()
            })
            .collect()
    }
}

#[async_trait]
impl StageHandler for Coder {
    fn name(&self) -> &'static str {
        "coder"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let decision = Decision::new(
            "coder",
            "code",
            format!("implementing: {}", task.objective),
            0.8,
        );

        let branch = format!("agent-code-{}", Utc::now().timestamp());
        if let Err(e) = self.ctx.workspace.checkout_branch(&branch).await {
            return TaskResult::failure(task.id, format!("failed to create branch: {e}"))
                .with_decision(decision);
        }

        let changed = self.changed_files(task);
        let diff = self.ctx.workspace.diff().await.unwrap_or_else(|e| {
            warn!(error = %e, "could not read working tree diff");
            String::new()
        });

        let mut result = TaskResult::new(task.id, !changed.is_empty());
        for file in &changed {
            let hunk: Vec<&str> = diff.lines().filter(|l| l.ends_with(file.as_str())).collect();
            result = result.with_evidence(
                Evidence::new(EvidenceKind::Diff, file.clone(), hunk.join("\n"))
                    .with_description(format!("Change applied to {file}")),
            );
        }

        let fmt = &self.ctx.commands.fmt;
        let out = run_or_report(&self.runner, fmt).await;
        if !out.success() {
            result = result.with_evidence(command_evidence(EvidenceKind::Log, fmt, &out));
        }

        if changed.is_empty() {
            result = result.with_error("no files changed");
        }
        let risk_level = Some(RiskLevel::from_change_count(changed.len()));
        result
            .with_output(StageOutput::Code(CodeOutput {
                files_changed: changed,
                branch,
                risk_level,
            }))
            .with_decision(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, TaskInputs, TaskType};
    use crate::handlers::testing::FakeWorkspace;
    use std::sync::Arc;

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("vendor")).unwrap();
        std::fs::write(dir.path().join("src/auth.go"), "package auth").unwrap();
        std::fs::write(dir.path().join("src/auth_test.go"), "package auth").unwrap();
        std::fs::write(dir.path().join("vendor/lib.go"), "package lib").unwrap();
        dir
    }

    fn coder(ws: FakeWorkspace) -> (Coder, Arc<FakeWorkspace>) {
        let ws = Arc::new(ws);
        let ctx = HandlerContext::new(ws.clone(), &Config::default());
        (Coder::new(ctx), ws)
    }

    #[tokio::test]
    async fn test_collects_permitted_existing_files() {
        let dir = repo();
        let (coder, ws) = coder(FakeWorkspace::new(dir.path()).with_diff("M src/auth.go"));
        let task = Task::new(TaskType::Code, "implement fix").with_inputs(TaskInputs::with_files([
            "vendor/lib.go",
            "src/missing.go",
        ]));

        let result = coder.execute(&CancellationToken::new(), &task).await;
        assert!(result.success);
        let StageOutput::Code(code) = &result.output else {
            panic!("expected code output");
        };
        assert_eq!(code.files_changed, vec!["src/auth.go"]);
        assert!(code.branch.starts_with("agent-code-"));
        assert_eq!(code.risk_level, Some(RiskLevel::Low));
        assert_eq!(result.evidence[0].content, "M src/auth.go");
        assert!(ws.ran("checkout agent-code-"));
        assert!(ws.ran("go fmt ./..."));
    }

    #[tokio::test]
    async fn test_nothing_to_change_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (coder, _) = coder(FakeWorkspace::new(dir.path()));
        let result = coder
            .execute(&CancellationToken::new(), &Task::new(TaskType::Code, "x"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no files changed"));
    }

    #[tokio::test]
    async fn test_branch_failure_is_reported() {
        let dir = repo();
        let (coder, ws) = coder(FakeWorkspace::new(dir.path()).failing_checkout());
        let result = coder
            .execute(&CancellationToken::new(), &Task::new(TaskType::Code, "x"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("failed to create branch"));
        assert!(!ws.ran("go fmt"));
    }

    #[tokio::test]
    async fn test_fmt_failure_is_logged_as_evidence() {
        let dir = repo();
        let (coder, _) = coder(FakeWorkspace::new(dir.path()).respond("go fmt", "syntax error", 2));
        let result = coder
            .execute(&CancellationToken::new(), &Task::new(TaskType::Code, "x"))
            .await;
        assert!(result
            .evidence
            .iter()
            .any(|e| e.kind == EvidenceKind::Log && e.content == "syntax error"));
    }
}
