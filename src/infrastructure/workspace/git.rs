//! Git working copy driven through the `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::domain::models::WorkspaceConfig;
use crate::domain::ports::{CommandOutput, Workspace, WorkspaceError, WorkspaceResult};

/// Author recorded on commits made by the pipeline.
const COMMIT_AUTHOR: &str = "pipewright <pipewright@localhost>";

/// [`Workspace`] over a local git repository.
///
/// Commands run with the repository root as working directory. Output is
/// stdout followed by stderr.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    repo_path: PathBuf,
    base_branch: String,
}

impl GitWorkspace {
    /// Open the repository at `repo_path`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::NotARepository`] when `git rev-parse` does
    /// not recognise the directory.
    pub async fn open(repo_path: impl Into<PathBuf>, config: &WorkspaceConfig) -> WorkspaceResult<Self> {
        let repo_path = repo_path.into();
        let status = Command::new("git")
            .current_dir(&repo_path)
            .args(["rev-parse", "--git-dir"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            _ => return Err(WorkspaceError::NotARepository(repo_path.display().to_string())),
        }

        info!(repo = %repo_path.display(), base_branch = %config.base_branch, "opened workspace");
        Ok(Self {
            repo_path,
            base_branch: config.base_branch.clone(),
        })
    }

    /// Branch that work branches are cut from.
    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    async fn git(&self, args: &[&str]) -> WorkspaceResult<String> {
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        let out = self.run_command("git", &args).await?;
        if out.success() {
            Ok(out.output)
        } else {
            Err(WorkspaceError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                output: out.output.trim().to_string(),
            })
        }
    }

    async fn branch_exists(&self, name: &str) -> bool {
        self.git(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")])
            .await
            .is_ok()
    }
}

#[async_trait]
impl Workspace for GitWorkspace {
    async fn run_command(&self, program: &str, args: &[String]) -> WorkspaceResult<CommandOutput> {
        debug!(program, ?args, "spawning command");
        let output = Command::new(program)
            .current_dir(&self.repo_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| WorkspaceError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            output: combined,
            exit_code: output.status.code(),
        })
    }

    #[instrument(skip(self))]
    async fn checkout_branch(&self, name: &str) -> WorkspaceResult<()> {
        if self.branch_exists(name).await {
            self.git(&["checkout", name]).await?;
        } else {
            self.git(&["checkout", "-b", name]).await?;
        }
        Ok(())
    }

    fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    #[instrument(skip(self))]
    async fn commit(&self, message: &str) -> WorkspaceResult<()> {
        self.git(&["add", "--all"]).await?;
        self.git(&["commit", "--author", COMMIT_AUTHOR, "-m", message])
            .await?;
        Ok(())
    }

    async fn diff(&self) -> WorkspaceResult<String> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(status
            .lines()
            .filter_map(|line| {
                let (code, path) = line.split_at_checked(2)?;
                Some(format!("{} {}", code.trim(), path.trim()))
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn cleanup(&self) -> WorkspaceResult<()> {
        self.git(&["checkout", &self.base_branch]).await?;
        Ok(())
    }
}
