//! `pipewright status`

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::Session;
use crate::cli::output::{output, CliOutput};
use crate::domain::models::{Config, StageOutput, Task, TaskId, TaskResult};

/// Arguments for `pipewright status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Task ID, e.g. task-3
    #[arg(short, long)]
    pub task: String,

    /// Path to git repository
    #[arg(short, long, default_value = ".")]
    pub repo: PathBuf,
}

#[derive(Debug, Serialize)]
struct TaskStatusView {
    task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<TaskResult>,
}

impl CliOutput for TaskStatusView {
    fn to_human(&self) -> String {
        let task = &self.task;
        let mut out = format!(
            "Task ID: {}\nType: {}\nState: {}\nObjective: {}\n",
            task.id,
            task.task_type.as_str(),
            task.state.as_str(),
            task.objective
        );
        if let Some(result) = &self.result {
            let _ = write!(
                out,
                "\nResult:\n  Success: {}\n  Duration: {:?}\n",
                result.success, result.duration
            );
            if let Some(error) = &result.error {
                let _ = writeln!(out, "  Error: {error}");
            }
            if result.output != StageOutput::None {
                let json = serde_json::to_string_pretty(&result.output).unwrap_or_default();
                out.push_str("\nOutputs:\n");
                for line in json.lines() {
                    let _ = writeln!(out, "  {line}");
                }
            }
        }
        out.trim_end().to_string()
    }
}

/// Print a task and its latest result.
pub async fn execute(args: StatusArgs, config: &Config, json: bool) -> Result<()> {
    let id: TaskId = args
        .task
        .parse()
        .with_context(|| format!("Invalid task id '{}'", args.task))?;

    let session = Session::open(config, &args.repo).await?;
    let (task, result) = session.orchestrator.lookup(id).await;
    let Some(task) = task else {
        anyhow::bail!("Task {id} not found. Task state lives only in the process that ran it.");
    };

    output(&TaskStatusView { task, result }, json);
    Ok(())
}
