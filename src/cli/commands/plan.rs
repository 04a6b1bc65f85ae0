//! `pipewright plan`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::Session;
use crate::cli::output::{output, stats_table, task_table, CliOutput};
use crate::domain::models::{Config, Task, TaskId};
use crate::services::StoreStats;

/// Arguments for `pipewright plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Objective to plan
    #[arg(short, long)]
    pub objective: String,

    /// Path to git repository
    #[arg(short, long, default_value = ".")]
    pub repo: PathBuf,

    /// Drive the workflow until every task finishes
    #[arg(short, long)]
    pub wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 600)]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct PlanSubmitted {
    task_id: TaskId,
    objective: String,
}

impl CliOutput for PlanSubmitted {
    fn to_human(&self) -> String {
        format!(
            "Plan task submitted: {}\nObjective: {}",
            self.task_id, self.objective
        )
    }
}

#[derive(Debug, Serialize)]
struct WorkflowReport {
    task_id: TaskId,
    objective: String,
    finished: bool,
    stats: StoreStats,
    tasks: Vec<Task>,
}

impl CliOutput for WorkflowReport {
    fn to_human(&self) -> String {
        let mut out = format!("Workflow for {}: {}\n", self.task_id, self.objective);
        if !self.finished {
            out.push_str("Timed out before every task finished.\n");
        }
        out.push_str(&task_table(&self.tasks));
        out.push('\n');
        out.push_str(&stats_table(&self.stats));
        out
    }
}

/// Submit a plan task, optionally driving it to completion.
pub async fn execute(args: PlanArgs, config: &Config, json: bool) -> Result<()> {
    let session = Session::open(config, &args.repo).await?;
    session.orchestrator.start().await?;

    let submitted = session
        .orchestrator
        .submit(Session::plan_task(config, &args.objective))
        .await
        .context("Failed to submit plan task");
    let task_id = match submitted {
        Ok(id) => id,
        Err(e) => {
            session.shutdown().await;
            return Err(e);
        }
    };

    if !args.wait {
        output(
            &PlanSubmitted {
                task_id,
                objective: args.objective,
            },
            json,
        );
        session.shutdown().await;
        return Ok(());
    }

    let finished = session
        .orchestrator
        .wait_for_idle(Duration::from_secs(args.timeout_secs))
        .await;
    let report = WorkflowReport {
        task_id,
        objective: args.objective,
        finished,
        stats: session.orchestrator.stats().await,
        tasks: session.orchestrator.all_tasks().await,
    };
    session.shutdown().await;
    output(&report, json);

    if !finished {
        anyhow::bail!("workflow did not finish within {}s", args.timeout_secs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskType;

    #[test]
    fn test_submitted_output() {
        let out = PlanSubmitted {
            task_id: TaskId::new(1),
            objective: "fix bug".into(),
        };
        assert_eq!(out.to_human(), "Plan task submitted: task-1\nObjective: fix bug");
        assert_eq!(out.to_json()["task_id"], 1);
    }

    #[test]
    fn test_report_flags_timeout() {
        let report = WorkflowReport {
            task_id: TaskId::new(1),
            objective: "fix bug".into(),
            finished: false,
            stats: StoreStats::default(),
            tasks: vec![Task::new(TaskType::Plan, "fix bug")],
        };
        assert!(report.to_human().contains("Timed out"));
        assert_eq!(report.to_json()["tasks"].as_array().map(Vec::len), Some(1));
    }
}
