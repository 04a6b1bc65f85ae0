//! Subcommand implementations and the wiring they share.

pub mod plan;
pub mod run;
pub mod status;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::domain::models::{Config, Task, TaskType};
use crate::domain::ports::Workspace;
use crate::handlers::{default_registry, HandlerContext};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::workspace::GitWorkspace;
use crate::services::Orchestrator;

/// Load configuration from `config` when given, else from the repository.
pub fn load_config(config: Option<&Path>, repo: &Path) -> Result<Config> {
    match config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load_in(repo),
    }
}

/// An orchestrator wired to the git repository at `repo`.
pub struct Session {
    /// Orchestrator with the built-in handlers
    pub orchestrator: Orchestrator,
    /// Repository the handlers work in
    pub workspace: Arc<GitWorkspace>,
}

impl Session {
    /// Open the workspace and build an orchestrator over it.
    pub async fn open(config: &Config, repo: &Path) -> Result<Self> {
        let workspace = Arc::new(
            GitWorkspace::open(repo, &config.workspace)
                .await
                .context("Failed to open workspace")?,
        );
        let ctx = HandlerContext::new(Arc::clone(&workspace) as Arc<dyn Workspace>, config);
        let orchestrator = Orchestrator::builder()
            .config(config.clone())
            .handlers(default_registry(&ctx))
            .build()
            .context("Failed to build orchestrator")?;
        Ok(Self {
            orchestrator,
            workspace,
        })
    }

    /// Plan task for `objective` with the configured retry cap.
    pub fn plan_task(config: &Config, objective: &str) -> Task {
        Task::new(TaskType::Plan, objective).with_max_retries(config.retry.default_max_retries)
    }

    /// Stop the orchestrator and return the repository to its base branch.
    pub async fn shutdown(&self) {
        self.orchestrator.stop().await;
        if let Err(e) = self.workspace.cleanup().await {
            warn!(error = %e, base_branch = self.workspace.base_branch(), "workspace cleanup failed");
        }
    }
}
