//! Domain models: tasks, results, policies and configuration.

pub mod config;
pub mod path_pattern;
pub mod policy;
pub mod result;
pub mod task;

pub use config::{
    CommandSpec, CommandsConfig, Config, GatesConfig, LoggingConfig, OrchestratorConfig,
    RetryConfig, WorkspaceConfig,
};
pub use path_pattern::{path_matches, PathPattern};
pub use policy::{AgentContract, Policy, PolicyKind, PolicyRule, RuleAction};
pub use result::{
    AuditFinding, AuditOutput, CodeOutput, Decision, Evidence, EvidenceKind, FindingCategory,
    OptimizeOutput, PlanOutput, ReleaseAction, ReleaseOutput, RepairOutput, RiskLevel, Severity,
    StageOutput, TaskResult, TestFailure, TestOutput, TestReport,
};
pub use task::{Constraints, StageInput, Task, TaskId, TaskInputs, TaskState, TaskType};
