//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use commands::{plan::PlanArgs, run::RunArgs, status::StatusArgs};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(about = "Policy-gated multi-stage workflow orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file, instead of <repo>/.pipewright/config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a plan for an objective
    Plan(PlanArgs),

    /// Show the state of a task
    Status(StatusArgs),

    /// Run the orchestrator on an objective until interrupted
    Run(RunArgs),
}

impl Commands {
    /// Repository the command operates on.
    pub fn repo(&self) -> &Path {
        match self {
            Self::Plan(args) => &args.repo,
            Self::Status(args) => &args.repo,
            Self::Run(args) => &args.repo,
        }
    }
}

/// Print `err` with its context chain and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1)
}
