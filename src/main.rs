//! Pipewright CLI entry point.

use clap::Parser;

use pipewright::cli::commands::{self, plan, run, status};
use pipewright::cli::{handle_error, Cli, Commands};
use pipewright::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match commands::load_config(cli.config.as_deref(), cli.command.repo()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    // Held for the life of the process so buffered file logs are flushed.
    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Plan(args) => plan::execute(args, &config, cli.json).await,
        Commands::Status(args) => status::execute(args, &config, cli.json).await,
        Commands::Run(args) => run::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
