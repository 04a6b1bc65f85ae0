//! Release stage: package, version, deploy or roll back.
//!
//! The action comes from keywords in the objective. An objective naming no
//! action gets a full release: package, then version, then deploy. A failed
//! version bump does not stop a full release.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{run_or_report, HandlerContext};
use crate::domain::models::{
    AgentContract, CommandSpec, Decision, Evidence, EvidenceKind, ReleaseAction, ReleaseOutput,
    StageOutput, Task, TaskResult,
};
use crate::domain::ports::StageHandler;
use crate::services::tool_runner::ToolRunner;

const VERSION_FILE: &str = "VERSION";
const K8S_DIR: &str = "k8s";
const INITIAL_VERSION: &str = "0.1.0";

static SEMVER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok());

/// Packages, versions, deploys or rolls back depending on the objective.
pub struct Releaser {
    ctx: HandlerContext,
    contract: AgentContract,
    runner: ToolRunner,
}

/// Action named by `objective`.
pub fn determine_action(objective: &str) -> ReleaseAction {
    let lowered = objective.to_lowercase();
    if lowered.contains("package") || lowered.contains("build") {
        ReleaseAction::Package
    } else if lowered.contains("version") {
        ReleaseAction::Version
    } else if lowered.contains("deploy") {
        ReleaseAction::Deploy
    } else if lowered.contains("rollback") {
        ReleaseAction::Rollback
    } else {
        ReleaseAction::Full
    }
}

/// Next patch version of `current`, without a `v` prefix.
///
/// Anything that is not `major.minor.patch` restarts at `0.1.0`.
pub fn bump_patch(current: Option<&str>) -> String {
    let parsed = current.and_then(|version| {
        let caps = SEMVER.as_ref()?.captures(version)?;
        let part = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();
        Some((part(1)?, part(2)?, part(3)?))
    });
    match parsed {
        Some((major, minor, patch)) => format!("{major}.{minor}.{}", patch.saturating_add(1)),
        None => INITIAL_VERSION.to_string(),
    }
}

/// Everything a release action reports back.
#[derive(Default)]
struct Outcome {
    version: Option<String>,
    package_path: Option<String>,
    deployed: bool,
    evidence: Vec<Evidence>,
}

impl Releaser {
    /// Releaser over the shared context.
    pub fn new(ctx: HandlerContext) -> Self {
        let contract = AgentContract::new("releaser", "Release")
            .with_allowed_paths(&[
                "**/Dockerfile",
                "**/Makefile",
                "**/*.yaml",
                "**/*.yml",
                "**/go.mod",
                VERSION_FILE,
            ])
            .with_forbidden_paths(&["**/*.go"])
            .with_tools(&["git", "go", "docker", "kubectl"]);
        let runner = ctx.runner(&contract);
        Self {
            ctx,
            contract,
            runner,
        }
    }

    fn repo(&self) -> &Path {
        self.ctx.workspace.repo_path()
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, String> {
        let spec = CommandSpec::new(program, args);
        let out = run_or_report(&self.runner, &spec).await;
        if out.success() {
            Ok(out.output)
        } else {
            Err(format!("{spec} failed: {}", out.output.trim()))
        }
    }

    /// Version recorded in `VERSION`, else the latest git tag.
    async fn current_version(&self) -> Option<String> {
        if let Ok(contents) = tokio::fs::read_to_string(self.repo().join(VERSION_FILE)).await {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        self.run("git", &["describe", "--tags", "--abbrev=0"])
            .await
            .ok()
            .map(|tag| tag.trim().trim_start_matches('v').to_string())
            .filter(|tag| !tag.is_empty())
    }

    async fn package(&self, outcome: &mut Outcome) -> Result<(), String> {
        let build = &self.ctx.commands.build;
        let out = run_or_report(&self.runner, build).await;
        if !out.success() {
            return Err(format!("build failed: {}", out.output.trim()));
        }
        outcome.evidence.push(
            Evidence::new(EvidenceKind::Report, "package", out.output)
                .with_description("Build artifacts"),
        );

        if self.repo().join("Dockerfile").is_file() {
            let image = format!("{}:latest", self.repo_name());
            match self.run("docker", &["build", "-t", &image, "."]).await {
                Ok(_) => outcome.package_path = Some(image),
                Err(e) => outcome
                    .evidence
                    .push(Evidence::new(EvidenceKind::Log, "docker build", e)),
            }
        }
        Ok(())
    }

    async fn version(&self, outcome: &mut Outcome) -> Result<(), String> {
        let next = bump_patch(self.current_version().await.as_deref());
        tokio::fs::write(self.repo().join(VERSION_FILE), &next)
            .await
            .map_err(|e| format!("failed to write version: {e}"))?;

        let tag = format!("v{next}");
        outcome.version = Some(next);
        self.run("git", &["tag", "-a", &tag, "-m", &format!("Release {tag}")])
            .await
            .map_err(|e| format!("failed to create tag: {e}"))?;
        outcome.evidence.push(
            Evidence::new(EvidenceKind::Metric, "version", tag.clone())
                .with_description(format!("Versioned as {tag}")),
        );
        Ok(())
    }

    async fn deploy(&self, task: &Task, outcome: &mut Outcome) -> Result<(), String> {
        let target = task
            .constraints
            .get("deploy_target")
            .and_then(serde_json::Value::as_str);
        let report = if target == Some("docker") {
            let version = match &outcome.version {
                Some(version) => version.clone(),
                None => self
                    .current_version()
                    .await
                    .unwrap_or_else(|| "latest".to_string()),
            };
            let image = format!("{}:{version}", self.repo_name());
            self.run("docker", &["build", "-t", &image, "."]).await?;
            format!("Docker image built: {image}")
        } else if self.repo().join(K8S_DIR).is_dir() {
            let out = self.run("kubectl", &["apply", "-f", "k8s/"]).await?;
            format!("Kubernetes deploy: {}", out.trim())
        } else {
            outcome.evidence.push(Evidence::new(
                EvidenceKind::Log,
                "deploy",
                "no deployment configuration found, manual deployment required",
            ));
            return Ok(());
        };
        outcome.deployed = true;
        outcome
            .evidence
            .push(Evidence::new(EvidenceKind::Report, "deploy", report));
        Ok(())
    }

    async fn rollback(&self, outcome: &mut Outcome) -> Result<(), String> {
        if !self.repo().join(K8S_DIR).is_dir() {
            outcome.evidence.push(Evidence::new(
                EvidenceKind::Log,
                "rollback",
                "no deployment configuration found, nothing to roll back",
            ));
            return Ok(());
        }
        let out = self
            .run("kubectl", &["rollout", "undo", "deployment/app"])
            .await?;
        outcome
            .evidence
            .push(Evidence::new(EvidenceKind::Report, "rollback", out));
        Ok(())
    }

    fn repo_name(&self) -> String {
        self.repo()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("app")
            .to_string()
    }

    async fn perform(
        &self,
        action: ReleaseAction,
        task: &Task,
        outcome: &mut Outcome,
    ) -> Result<(), String> {
        match action {
            ReleaseAction::Package => self.package(outcome).await,
            ReleaseAction::Version => self.version(outcome).await,
            ReleaseAction::Deploy => self.deploy(task, outcome).await,
            ReleaseAction::Rollback => self.rollback(outcome).await,
            ReleaseAction::Full => {
                self.package(outcome).await?;
                if let Err(e) = self.version(outcome).await {
                    warn!(error = %e, "continuing release without a new version");
                    outcome
                        .evidence
                        .push(Evidence::new(EvidenceKind::Log, "version", e));
                }
                self.deploy(task, outcome).await
            }
        }
    }
}

#[async_trait]
impl StageHandler for Releaser {
    fn name(&self) -> &'static str {
        "releaser"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let action = determine_action(&task.objective);
        let decision = Decision::new(
            "releaser",
            "release",
            format!("executing release: {}", task.objective),
            0.85,
        )
        .with_metadata("action", serde_json::json!(action.as_str()));

        let mut outcome = Outcome::default();
        let performed = self.perform(action, task, &mut outcome).await;
        info!(
            task_id = %task.id,
            action = action.as_str(),
            version = outcome.version.as_deref().unwrap_or("-"),
            deployed = outcome.deployed,
            "release finished"
        );

        let mut result = TaskResult::new(task.id, performed.is_ok()).with_decision(decision);
        result.evidence = outcome.evidence;
        if let Err(e) = performed {
            result = result.with_error(e);
        }
        result.with_output(StageOutput::Release(ReleaseOutput {
            action,
            version: outcome.version,
            package_path: outcome.package_path,
            deployed: outcome.deployed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, TaskType};
    use crate::handlers::testing::FakeWorkspace;
    use std::sync::Arc;

    fn releaser(ws: FakeWorkspace) -> (Releaser, Arc<FakeWorkspace>) {
        let ws = Arc::new(ws);
        (
            Releaser::new(HandlerContext::new(ws.clone(), &Config::default())),
            ws,
        )
    }

    fn release_output(result: &TaskResult) -> &ReleaseOutput {
        match &result.output {
            StageOutput::Release(out) => out,
            other => panic!("expected release output, got {other:?}"),
        }
    }

    #[test]
    fn test_determine_action() {
        assert_eq!(determine_action("Build the binaries"), ReleaseAction::Package);
        assert_eq!(determine_action("bump version"), ReleaseAction::Version);
        assert_eq!(determine_action("deploy to staging"), ReleaseAction::Deploy);
        assert_eq!(determine_action("rollback prod"), ReleaseAction::Rollback);
        assert_eq!(determine_action("ship it"), ReleaseAction::Full);
    }

    #[test]
    fn test_bump_patch() {
        assert_eq!(bump_patch(Some("1.4.9")), "1.4.10");
        assert_eq!(bump_patch(Some("v2.0.0-rc1")), "2.0.1");
        assert_eq!(bump_patch(Some("nightly")), "0.1.0");
        assert_eq!(bump_patch(None), "0.1.0");
    }

    #[tokio::test]
    async fn test_version_bumps_file_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(VERSION_FILE), "1.2.3\n").unwrap();
        let (releaser, ws) = releaser(FakeWorkspace::new(dir.path()));

        let result = releaser
            .execute(&CancellationToken::new(), &Task::new(TaskType::Release, "version"))
            .await;

        assert!(result.success);
        assert_eq!(release_output(&result).version.as_deref(), Some("1.2.4"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
            "1.2.4"
        );
        assert!(ws.ran("git tag -a v1.2.4 -m Release v1.2.4"));
    }

    #[tokio::test]
    async fn test_version_falls_back_to_git_tag() {
        let dir = tempfile::tempdir().unwrap();
        let (releaser, _) =
            releaser(FakeWorkspace::new(dir.path()).respond("git describe", "v0.9.1\n", 0));

        let result = releaser
            .execute(&CancellationToken::new(), &Task::new(TaskType::Release, "version"))
            .await;
        assert_eq!(release_output(&result).version.as_deref(), Some("0.9.2"));
    }

    #[tokio::test]
    async fn test_failed_build_fails_package() {
        let dir = tempfile::tempdir().unwrap();
        let (releaser, _) =
            releaser(FakeWorkspace::new(dir.path()).respond("go build", "undefined: Foo", 1));

        let result = releaser
            .execute(&CancellationToken::new(), &Task::new(TaskType::Release, "package"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("build failed: undefined: Foo"));
    }

    #[tokio::test]
    async fn test_full_release_deploys_to_docker() {
        let dir = tempfile::tempdir().unwrap();
        let (releaser, ws) = releaser(FakeWorkspace::new(dir.path()));
        let task = Task::new(TaskType::Release, "ship it")
            .with_constraint("deploy_target", serde_json::json!("docker"));

        let result = releaser.execute(&CancellationToken::new(), &task).await;

        assert!(result.success);
        let out = release_output(&result);
        assert_eq!(out.action, ReleaseAction::Full);
        assert_eq!(out.version.as_deref(), Some("0.1.0"));
        assert!(out.deployed);
        assert!(ws.ran("go build"));
        assert!(ws.ran("docker build -t"));
        assert!(ws.calls().iter().any(|c| c.ends_with(":0.1.0 .")));
    }

    #[tokio::test]
    async fn test_rollback_without_k8s_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (releaser, ws) = releaser(FakeWorkspace::new(dir.path()));
        let result = releaser
            .execute(&CancellationToken::new(), &Task::new(TaskType::Release, "rollback"))
            .await;
        assert!(result.success);
        assert!(!release_output(&result).deployed);
        assert!(!ws.ran("kubectl"));
    }

    #[tokio::test]
    async fn test_rollback_with_k8s_undoes_rollout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(K8S_DIR)).unwrap();
        let (releaser, ws) = releaser(FakeWorkspace::new(dir.path()));
        let result = releaser
            .execute(&CancellationToken::new(), &Task::new(TaskType::Release, "rollback"))
            .await;
        assert!(result.success);
        assert!(ws.ran("kubectl rollout undo deployment/app"));
    }
}
