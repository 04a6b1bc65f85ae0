//! `pipewright run`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use super::Session;
use crate::cli::output::stats_table;
use crate::domain::models::Config;
use crate::services::OrchestratorEvent;

const PRINTER_DRAIN: Duration = Duration::from_secs(2);

/// Arguments for `pipewright run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Objective for the initial plan task
    #[arg(short, long)]
    pub task: String,

    /// Path to git repository
    #[arg(short, long, default_value = ".")]
    pub repo: PathBuf,
}

/// Run until ctrl-c or SIGTERM, printing events as they arrive.
pub async fn execute(args: RunArgs, config: &Config, json: bool) -> Result<()> {
    let session = Session::open(config, &args.repo).await?;
    let events = session.orchestrator.subscribe();
    session.orchestrator.start().await?;

    let printer = tokio::spawn(print_events(events, json));

    match session
        .orchestrator
        .submit(Session::plan_task(config, &args.task))
        .await
    {
        Ok(id) => println!("Task submitted: {id}"),
        Err(e) => {
            session.shutdown().await;
            printer.abort();
            return Err(e).context("Failed to submit plan task");
        }
    }

    shutdown_signal().await;
    println!("Shutting down...");
    info!("shutdown requested");
    session.shutdown().await;
    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        warn!("event printer did not drain before exit");
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&session.orchestrator.stats().await)?
        );
    } else {
        println!("{}", stats_table(&session.orchestrator.stats().await));
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<OrchestratorEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{}", format_event(&event, json));
                if event == OrchestratorEvent::Stopped {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn format_event(event: &OrchestratorEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(event).unwrap_or_default();
    }
    match event {
        OrchestratorEvent::Submitted {
            task_id,
            task_type,
            parent_id,
        } => match parent_id {
            Some(parent) => format!("[submitted] {task_id} {} (from {parent})", task_type.as_str()),
            None => format!("[submitted] {task_id} {}", task_type.as_str()),
        },
        OrchestratorEvent::Started {
            task_id,
            task_type,
            attempt,
        } => format!("[started]   {task_id} {} attempt {attempt}", task_type.as_str()),
        OrchestratorEvent::Retrying {
            task_id,
            retry_count,
            backoff_ms,
            ..
        } => format!("[retrying]  {task_id} retry {retry_count} in {backoff_ms}ms"),
        OrchestratorEvent::Completed {
            task_id,
            task_type,
            state,
            error,
        } => match error {
            Some(error) => format!(
                "[{}] {task_id} {}: {error}",
                state.as_str(),
                task_type.as_str()
            ),
            None => format!("[{}] {task_id} {}", state.as_str(), task_type.as_str()),
        },
        OrchestratorEvent::FollowUpSuppressed {
            parent_id,
            task_type,
            depth,
        } => format!(
            "[suppressed] {} follow-up of {parent_id} at depth {depth}",
            task_type.as_str()
        ),
        OrchestratorEvent::Stopped => "[stopped]".to_string(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
