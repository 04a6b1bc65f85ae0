//! Workspace port - the repository stage handlers operate on.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors raised by a workspace implementation.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Path is not inside a git work tree
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// Process could not be started
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// Command exited non-zero where success was required
    #[error("command failed: {command}: {output}")]
    CommandFailed {
        /// Command line that ran
        command: String,
        /// Captured output
        output: String,
    },

    /// Command rejected before it ran
    #[error("command refused: {0}")]
    Refused(String),

    /// Command exceeded its time limit
    #[error("command timed out after {secs}s: {command}")]
    TimedOut {
        /// Command line that ran
        command: String,
        /// Limit that was exceeded
        secs: u64,
    },

    /// Filesystem error
    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Combined stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Interleaved stdout and stderr
    pub output: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Exit code was zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Version-controlled working copy.
///
/// `run_command` returns `Ok` for any command that ran, whatever its exit
/// code; only a failure to start the process is an error.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Run `program` in the repository root and capture its output.
    async fn run_command(&self, program: &str, args: &[String]) -> WorkspaceResult<CommandOutput>;

    /// Create the branch if needed and switch to it.
    async fn checkout_branch(&self, name: &str) -> WorkspaceResult<()>;

    /// Repository root.
    fn repo_path(&self) -> &Path;

    /// Stage everything and commit.
    async fn commit(&self, message: &str) -> WorkspaceResult<()>;

    /// Working-tree changes, one `<status> <path>` line per file.
    async fn diff(&self) -> WorkspaceResult<String>;

    /// Return to the base branch.
    async fn cleanup(&self) -> WorkspaceResult<()>;
}
