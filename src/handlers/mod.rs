//! Stage handlers.
//!
//! One [`StageHandler`] per task type. Every handler reaches the repository
//! through a [`ToolRunner`] bound to its own [`AgentContract`], so a handler
//! can only run the tools its contract lists.
//!
//! [`StageHandler`]: crate::domain::ports::StageHandler

pub mod auditor;
pub mod coder;
pub mod optimizer;
pub mod planner;
pub mod releaser;
pub mod repairer;
pub mod tester;

pub use auditor::Auditor;
pub use coder::Coder;
pub use optimizer::Optimizer;
pub use planner::Planner;
pub use releaser::Releaser;
pub use repairer::Repairer;
pub use tester::Tester;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::models::{
    AgentContract, CommandSpec, CommandsConfig, Config, Evidence, EvidenceKind, TaskType,
};
use crate::domain::ports::{CommandOutput, Workspace, WorkspaceResult};
use crate::services::evaluation_engine::EvaluationEngine;
use crate::services::handler_registry::HandlerRegistry;
use crate::services::tool_runner::ToolRunner;

/// Collaborators shared by the stage handlers.
#[derive(Clone)]
pub struct HandlerContext {
    /// Repository the stages operate on
    pub workspace: Arc<dyn Workspace>,
    /// Toolchain commands
    pub commands: Arc<CommandsConfig>,
    /// Failure classifier used by repair
    pub evaluation: Arc<EvaluationEngine>,
    /// Coverage threshold mirrored from the gates
    pub min_coverage: f64,
}

impl HandlerContext {
    /// Context over `workspace` with the built-in failure patterns.
    pub fn new(workspace: Arc<dyn Workspace>, config: &Config) -> Self {
        Self {
            workspace,
            commands: Arc::new(config.commands.clone()),
            evaluation: Arc::new(EvaluationEngine::new()),
            min_coverage: config.gates.min_coverage,
        }
    }

    /// Replace the failure classifier.
    pub fn with_evaluation(mut self, evaluation: EvaluationEngine) -> Self {
        self.evaluation = Arc::new(evaluation);
        self
    }

    /// Tool runner bound to `contract`.
    pub fn runner(&self, contract: &AgentContract) -> ToolRunner {
        ToolRunner::new(Arc::clone(&self.workspace), contract.clone())
    }
}

/// Registry with the built-in handler for every stage.
pub fn default_registry(ctx: &HandlerContext) -> HandlerRegistry {
    HandlerRegistry::new()
        .with_handler(TaskType::Plan, Arc::new(Planner::new()))
        .with_handler(TaskType::Code, Arc::new(Coder::new(ctx.clone())))
        .with_handler(TaskType::Test, Arc::new(Tester::new(ctx.clone())))
        .with_handler(TaskType::Audit, Arc::new(Auditor::new(ctx.clone())))
        .with_handler(TaskType::Repair, Arc::new(Repairer::new(ctx.clone())))
        .with_handler(TaskType::Optimize, Arc::new(Optimizer::new(ctx.clone())))
        .with_handler(TaskType::Release, Arc::new(Releaser::new(ctx.clone())))
}

/// Run `spec`, folding a refused or unstartable command into a failed output.
async fn run_or_report(runner: &ToolRunner, spec: &CommandSpec) -> CommandOutput {
    collapse(runner.run_spec(spec).await)
}

fn collapse(result: WorkspaceResult<CommandOutput>) -> CommandOutput {
    result.unwrap_or_else(|e| CommandOutput {
        output: e.to_string(),
        exit_code: None,
    })
}

fn command_evidence(kind: EvidenceKind, spec: &CommandSpec, out: &CommandOutput) -> Evidence {
    Evidence::new(kind, spec.to_string(), out.output.clone())
}

/// Files under `dir`, relative to `root`, depth first in name order.
///
/// Hidden entries are skipped. Stops after `limit` files.
fn list_files(root: &Path, dir: &Path, limit: usize) -> Vec<String> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        let mut entries: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'))
            })
            .collect();
        entries.sort();
        for path in entries.into_iter().rev() {
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                found.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    found.sort();
    found.truncate(limit);
    found
}

/// Literal leading directory of a glob, e.g. `src` for `src/**`.
fn glob_root(glob: &str) -> Option<&str> {
    let literal: Vec<&str> = glob
        .split('/')
        .take_while(|seg| !seg.contains(['*', '?']))
        .collect();
    if literal.is_empty() {
        None
    } else {
        let end = literal.iter().map(|s| s.len()).sum::<usize>() + literal.len() - 1;
        Some(&glob[..end])
    }
}
