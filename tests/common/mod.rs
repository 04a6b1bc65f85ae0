//! Common test utilities for integration tests
//!
//! Scripted stage handlers, a scripted workspace and config helpers shared
//! by the integration test files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use pipewright::domain::models::{AgentContract, Config, Task, TaskResult};
use pipewright::domain::ports::{CommandOutput, StageHandler, Workspace, WorkspaceResult};

/// Config with millisecond backoff and no stage-completeness check.
pub fn quick_config() -> Config {
    let mut config = Config::default();
    config.retry.backoff_unit_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.orchestrator.require_all_stages = false;
    config
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

type Script = dyn Fn(&Task, u32) -> TaskResult + Send + Sync;

/// Stage handler whose result is computed by a closure from the task and
/// the zero-based call number.
pub struct ScriptedHandler {
    contract: AgentContract,
    calls: AtomicU32,
    script: Box<Script>,
}

impl ScriptedHandler {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&Task, u32) -> TaskResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            contract: AgentContract::new("scripted", "Scripted"),
            calls: AtomicU32::new(0),
            script: Box::new(script),
        })
    }

    /// Always succeeds with no output.
    pub fn succeeding() -> Arc<Self> {
        Self::new(|task, _| TaskResult::new(task.id, true))
    }

    /// Always fails with `error`.
    pub fn failing(error: &'static str) -> Arc<Self> {
        Self::new(move |task, _| TaskResult::failure(task.id, error))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler for ScriptedHandler {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(task, call)
    }
}

/// Handler that holds every attempt until the orchestrator cancels it.
pub struct BlockingHandler {
    contract: AgentContract,
    started: AtomicU32,
}

impl BlockingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contract: AgentContract::new("blocking", "Blocking"),
            started: AtomicU32::new(0),
        })
    }

    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageHandler for BlockingHandler {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, cancel: &CancellationToken, task: &Task) -> TaskResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        TaskResult::failure(task.id, "interrupted")
    }
}

/// Workspace over a directory that answers commands from a script.
///
/// Commands match by prefix of `program args...`; the first matching
/// script wins and anything unscripted succeeds with no output.
pub struct ScriptedWorkspace {
    root: PathBuf,
    responses: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            responses: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, prefix: &str, output: &str, exit_code: i32) -> Self {
        self.responses.push((
            prefix.to_string(),
            CommandOutput {
                output: output.to_string(),
                exit_code: Some(exit_code),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Workspace for ScriptedWorkspace {
    async fn run_command(&self, program: &str, args: &[String]) -> WorkspaceResult<CommandOutput> {
        let command = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.record(command.clone());
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or(CommandOutput {
                output: String::new(),
                exit_code: Some(0),
            }))
    }

    async fn checkout_branch(&self, name: &str) -> WorkspaceResult<()> {
        self.record(format!("checkout {name}"));
        Ok(())
    }

    fn repo_path(&self) -> &Path {
        &self.root
    }

    async fn commit(&self, message: &str) -> WorkspaceResult<()> {
        self.record(format!("commit {message}"));
        Ok(())
    }

    async fn diff(&self) -> WorkspaceResult<String> {
        Ok(String::new())
    }

    async fn cleanup(&self) -> WorkspaceResult<()> {
        self.record("cleanup".to_string());
        Ok(())
    }
}

/// Go-style project with one source file under `src/`.
pub fn go_project() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(
        dir.path().join("src/login.go"),
        "package src\n\nfunc Login(user string) bool {\n\treturn user != \"\"\n}\n",
    )
    .unwrap();
    dir
}

/// Whether a `git` binary is on the PATH.
pub fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

/// Setup a git repository in a temp directory for testing
///
/// Creates an initialized git repo on branch `main` with an initial empty
/// commit.
pub fn setup_test_git_repo() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir for git repo");
    let path = dir.path().to_path_buf();

    let git = |args: &[&str]| {
        let out = Command::new("git")
            .args(args)
            .current_dir(&path)
            .output()
            .expect("Failed to run git");
        assert!(out.status.success(), "git {args:?} failed");
    };
    git(&["init", "-b", "main"]);
    git(&["config", "user.email", "test@test.com"]);
    git(&["config", "user.name", "Test User"]);
    git(&["commit", "--allow-empty", "-m", "initial commit"]);

    (dir, path)
}
