//! Configuration model with serde defaults for every section.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::models::policy::Policy;

/// Main configuration structure for Pipewright
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Queue, lineage and follow-up settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path policies checked at admission
    #[serde(default)]
    pub policies: Vec<Policy>,

    /// Gate thresholds
    #[serde(default)]
    pub gates: GatesConfig,

    /// Toolchain commands run by stage handlers
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Repository workspace settings
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Capacity of the bounded submission queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Follow-ups deeper than this are not submitted
    #[serde(default = "default_max_lineage_depth")]
    pub max_lineage_depth: u32,

    /// Retry cap given to derived follow-up tasks
    #[serde(default)]
    pub follow_up_max_retries: u32,

    /// Refuse to build an orchestrator with unhandled stages
    #[serde(default = "default_true")]
    pub require_all_stages: bool,
}

const fn default_queue_capacity() -> usize {
    100
}

const fn default_max_lineage_depth() -> u32 {
    16
}

const fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_lineage_depth: default_max_lineage_depth(),
            follow_up_max_retries: 0,
            require_all_stages: default_true(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Linear backoff unit; attempt n waits n units
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Upper bound on a single backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Retry cap for tasks submitted from the command line
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

const fn default_backoff_unit_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_unit_ms: default_backoff_unit_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            default_max_retries: default_max_retries(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatesConfig {
    /// Minimum coverage percentage for the coverage gate
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
}

const fn default_min_coverage() -> f64 {
    70.0
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path
    pub program: String,
    /// Arguments, passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build a spec from string slices.
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Toolchain commands used by the stage handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandsConfig {
    /// Test run with verbose output and coverage
    #[serde(default = "default_test_command")]
    pub test: CommandSpec,
    /// Coverage profile run
    #[serde(default = "default_coverage_command")]
    pub coverage: CommandSpec,
    /// Formatter
    #[serde(default = "default_fmt_command")]
    pub fmt: CommandSpec,
    /// Vet-style static checks
    #[serde(default = "default_vet_command")]
    pub vet: CommandSpec,
    /// Linter
    #[serde(default = "default_lint_command")]
    pub lint: CommandSpec,
    /// Automatic fixer used by repair
    #[serde(default = "default_fix_command")]
    pub fix: CommandSpec,
    /// Import organizer
    #[serde(default = "default_imports_command")]
    pub imports: CommandSpec,
    /// Build used to package a release
    #[serde(default = "default_build_command")]
    pub build: CommandSpec,
    /// Benchmark run
    #[serde(default = "default_bench_command")]
    pub bench: CommandSpec,
    /// Lists tests without running them
    #[serde(default = "default_list_tests_command")]
    pub list_tests: CommandSpec,
    /// Lists module dependencies
    #[serde(default = "default_deps_command")]
    pub deps: CommandSpec,
}

fn default_test_command() -> CommandSpec {
    CommandSpec::new("go", &["test", "-v", "-cover", "./..."])
}

fn default_coverage_command() -> CommandSpec {
    CommandSpec::new("go", &["test", "-coverprofile=coverage.out", "./..."])
}

fn default_fmt_command() -> CommandSpec {
    CommandSpec::new("go", &["fmt", "./..."])
}

fn default_vet_command() -> CommandSpec {
    CommandSpec::new("go", &["vet", "./..."])
}

fn default_lint_command() -> CommandSpec {
    CommandSpec::new("golangci-lint", &["run"])
}

fn default_fix_command() -> CommandSpec {
    CommandSpec::new("go", &["fix", "./..."])
}

fn default_imports_command() -> CommandSpec {
    CommandSpec::new("goimports", &["-w", "."])
}

fn default_build_command() -> CommandSpec {
    CommandSpec::new("go", &["build", "./..."])
}

fn default_bench_command() -> CommandSpec {
    CommandSpec::new("go", &["test", "-bench=.", "-benchmem", "./..."])
}

fn default_list_tests_command() -> CommandSpec {
    CommandSpec::new("go", &["test", "-list", ".", "./..."])
}

fn default_deps_command() -> CommandSpec {
    CommandSpec::new("go", &["list", "-m", "all"])
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            test: default_test_command(),
            coverage: default_coverage_command(),
            fmt: default_fmt_command(),
            vet: default_vet_command(),
            lint: default_lint_command(),
            fix: default_fix_command(),
            imports: default_imports_command(),
            build: default_build_command(),
            bench: default_bench_command(),
            list_tests: default_list_tests_command(),
            deps: default_deps_command(),
        }
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceConfig {
    /// Branch restored on cleanup
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sections() {
        let config = Config::default();
        assert_eq!(config.orchestrator.queue_capacity, 100);
        assert_eq!(config.orchestrator.max_lineage_depth, 16);
        assert_eq!(config.orchestrator.follow_up_max_retries, 0);
        assert!(config.orchestrator.require_all_stages);
        assert_eq!(config.retry.backoff_unit_ms, 1000);
        assert!((config.gates.min_coverage - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.workspace.base_branch, "main");
    }

    #[test]
    fn test_command_spec_display() {
        assert_eq!(
            CommandsConfig::default().test.to_string(),
            "go test -v -cover ./..."
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "commands:\n  test:\n    program: cargo\n    args: [test]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.commands.test.program, "cargo");
        assert_eq!(config.commands.fmt, default_fmt_command());
        assert_eq!(config.retry.max_backoff_ms, 30_000);
    }
}
