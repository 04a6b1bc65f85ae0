//! Contract-checked command execution for stage handlers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::models::{AgentContract, CommandSpec};
use crate::domain::ports::{CommandOutput, Workspace, WorkspaceError, WorkspaceResult};

const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);

/// Runs workspace commands on behalf of one agent.
///
/// A command is refused unless the agent's contract lists its program.
/// `rm -rf` and `git push --force` are refused for every agent.
#[derive(Clone)]
pub struct ToolRunner {
    workspace: Arc<dyn Workspace>,
    contract: AgentContract,
    max_duration: Duration,
}

impl ToolRunner {
    /// Runner bound to a workspace and the agent's contract.
    pub fn new(workspace: Arc<dyn Workspace>, contract: AgentContract) -> Self {
        Self {
            workspace,
            contract,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }

    /// Cap how long a single command may run.
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Workspace commands run in.
    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    /// Check a command without running it; `Err` carries the reason.
    pub fn validate(&self, program: &str, args: &[String]) -> Result<(), String> {
        if !self.contract.allows_tool(program) {
            return Err(format!(
                "command '{program}' not allowed for agent '{}'",
                self.contract.id
            ));
        }
        let has = |flag: &str| args.iter().any(|a| a == flag);
        if program == "rm" && (has("-rf") || has("-fr")) {
            return Err("dangerous command: rm -rf".to_string());
        }
        if program == "git" && has("push") && (has("--force") || has("-f")) {
            return Err("dangerous command: git push --force".to_string());
        }
        Ok(())
    }

    /// Validate against the contract, then run with the time limit.
    pub async fn run(&self, program: &str, args: &[String]) -> WorkspaceResult<CommandOutput> {
        let command = render(program, args);
        if let Err(reason) = self.validate(program, args) {
            warn!(agent = %self.contract.id, command = %command, reason = %reason, "command refused");
            return Err(WorkspaceError::Refused(reason));
        }

        debug!(agent = %self.contract.id, command = %command, "running command");
        tokio::time::timeout(self.max_duration, self.workspace.run_command(program, args))
            .await
            .map_err(|_| WorkspaceError::TimedOut {
                command,
                secs: self.max_duration.as_secs(),
            })?
    }

    /// Run a configured command.
    pub async fn run_spec(&self, spec: &CommandSpec) -> WorkspaceResult<CommandOutput> {
        self.run(&spec.program, &spec.args).await
    }
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWorkspace {
        root: PathBuf,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Workspace for RecordingWorkspace {
        async fn run_command(&self, program: &str, args: &[String]) -> WorkspaceResult<CommandOutput> {
            self.calls.lock().unwrap().push(render(program, args));
            Ok(CommandOutput {
                output: "ok".into(),
                exit_code: Some(0),
            })
        }
        async fn checkout_branch(&self, _name: &str) -> WorkspaceResult<()> {
            Ok(())
        }
        fn repo_path(&self) -> &Path {
            &self.root
        }
        async fn commit(&self, _message: &str) -> WorkspaceResult<()> {
            Ok(())
        }
        async fn diff(&self) -> WorkspaceResult<String> {
            Ok(String::new())
        }
        async fn cleanup(&self) -> WorkspaceResult<()> {
            Ok(())
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_runs_allowed_tool() {
        let workspace = Arc::new(RecordingWorkspace::default());
        let runner = ToolRunner::new(
            workspace.clone(),
            AgentContract::new("coder", "Coder").with_tools(&["go", "git"]),
        );
        let out = runner.run("go", &args(&["fmt", "./..."])).await.unwrap();
        assert!(out.success());
        assert_eq!(workspace.calls.lock().unwrap().as_slice(), ["go fmt ./..."]);
    }

    #[tokio::test]
    async fn test_refuses_tool_outside_contract() {
        let workspace = Arc::new(RecordingWorkspace::default());
        let runner = ToolRunner::new(workspace.clone(), AgentContract::new("planner", "Planner"));
        let err = runner.run("go", &args(&["test"])).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Refused(_)));
        assert!(workspace.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dangerous_commands_always_refused() {
        let runner = ToolRunner::new(
            Arc::new(RecordingWorkspace::default()),
            AgentContract::new("releaser", "Releaser").with_tools(&["git", "rm"]),
        );
        assert!(runner.validate("rm", &args(&["-rf", "/"])).is_err());
        assert!(runner
            .validate("git", &args(&["push", "--force", "origin"]))
            .is_err());
        assert!(runner.validate("git", &args(&["push", "origin"])).is_ok());
        assert!(runner.validate("git", &args(&["tag", "-f", "v1"])).is_ok());
    }
}
