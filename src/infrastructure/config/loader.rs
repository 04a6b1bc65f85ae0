//! Loads and validates [`Config`] from YAML and the environment.

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::PathPattern;

/// Directory, relative to the repository, holding project configuration.
pub const CONFIG_DIR: &str = ".pipewright";

/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "PIPEWRIGHT_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Queue capacity below 1
    #[error("Invalid queue_capacity: {0}. Must be at least 1")]
    InvalidQueueCapacity(usize),

    /// Unknown log level
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Unknown log format
    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    /// Unknown rotation policy
    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    /// Backoff unit of zero
    #[error("Invalid backoff_unit_ms: 0. Must be at least 1")]
    ZeroBackoffUnit,

    #[error(
        "Invalid backoff configuration: backoff_unit_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    /// Backoff unit larger than the cap
    InvalidBackoff(u64, u64),

    /// Coverage threshold outside 0..=100
    #[error("Invalid min_coverage: {0}. Must be between 0 and 100")]
    InvalidCoverage(f64),

    /// Any other invalid setting
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the repository in the working directory.
    pub fn load() -> Result<Config> {
        Self::load_in(".")
    }

    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. <repo>/.pipewright/config.yaml (project config)
    /// 3. <repo>/.pipewright/local.yaml (local overrides, optional)
    /// 4. Environment variables (PIPEWRIGHT_* prefix, highest priority)
    pub fn load_in(repo: impl AsRef<Path>) -> Result<Config> {
        let dir = repo.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring environment
    /// overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.orchestrator.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(
                config.orchestrator.queue_capacity,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.retry.backoff_unit_ms == 0 {
            return Err(ConfigError::ZeroBackoffUnit);
        }

        if config.retry.backoff_unit_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.backoff_unit_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if !(0.0..=100.0).contains(&config.gates.min_coverage) {
            return Err(ConfigError::InvalidCoverage(config.gates.min_coverage));
        }

        for policy in &config.policies {
            if policy.id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "policy id cannot be empty".to_string(),
                ));
            }
            for glob in policy.allowed_paths.iter().chain(&policy.forbidden_paths) {
                PathPattern::new(glob).map_err(|e| {
                    ConfigError::ValidationFailed(format!("policy '{}': {e}", policy.id))
                })?;
            }
        }

        let commands = &config.commands;
        let named = [
            ("test", &commands.test),
            ("coverage", &commands.coverage),
            ("fmt", &commands.fmt),
            ("vet", &commands.vet),
            ("lint", &commands.lint),
            ("fix", &commands.fix),
            ("imports", &commands.imports),
            ("build", &commands.build),
            ("bench", &commands.bench),
            ("list_tests", &commands.list_tests),
            ("deps", &commands.deps),
        ];
        if let Some((name, _)) = named.iter().find(|(_, spec)| spec.program.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "command '{name}' has no program"
            )));
        }

        if config.workspace.base_branch.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "workspace base_branch cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
