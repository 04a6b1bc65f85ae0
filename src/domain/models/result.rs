//! Task results and the typed payloads stage handlers produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::domain::models::task::{Task, TaskId, TaskState};

/// Severity of an audit finding or failure pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Exploitable or data-losing; blocks release
    Critical,
    /// Must be fixed before merge
    High,
    /// Should be fixed
    Medium,
    /// Cosmetic or unlikely
    Low,
    /// Informational only
    Info,
}

impl Severity {
    /// Lowercase name used in logs and serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    /// Critical or High.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of evidence attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Command or tool output
    Log,
    /// Structured report such as a coverage profile
    Report,
    /// Working-tree diff
    Diff,
    /// Measured value such as a benchmark
    Metric,
}

impl EvidenceKind {
    /// Lowercase name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Report => "report",
            Self::Diff => "diff",
            Self::Metric => "metric",
        }
    }

    /// Free text worth scanning for failure patterns.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Log | Self::Report)
    }
}

/// Raw execution artifact: command output, a diff, a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// What sort of artifact this is
    pub kind: EvidenceKind,
    /// Command or component that produced it
    pub source: String,
    /// Raw artifact text
    pub content: String,
    /// Optional human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the evidence was captured
    pub timestamp: DateTime<Utc>,
}

impl Evidence {
    /// Create evidence stamped with the current time
    pub fn new(kind: EvidenceKind, source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            content: content.into(),
            description: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a summary
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Entry in the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Agent (or orchestrator) that took the action
    pub agent: String,
    /// Why the action was taken
    pub reason: String,
    /// Short action tag, e.g. `plan` or `suppress_follow_up`
    pub action: String,
    /// When the decision was recorded
    pub timestamp: DateTime<Utc>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Free-form structured detail
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Decision {
    /// Create a decision; confidence is clamped to [0, 1].
    pub fn new(
        agent: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            agent: agent.into(),
            reason: reason.into(),
            action: action.into(),
            timestamp: Utc::now(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What an audit finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// Exploitable code pattern
    Security,
    /// Formatting
    Style,
    /// Static analysis
    Lint,
    /// Dependency health
    Dependency,
    /// License compliance
    License,
    /// Credential or key in source
    Secret,
}

impl FindingCategory {
    /// Lowercase name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Style => "style",
            Self::Lint => "lint",
            Self::Dependency => "dependency",
            Self::License => "license",
            Self::Secret => "secret",
        }
    }
}

/// A problem reported by the audit stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    /// Stable finding identifier, e.g. `SEC-1`
    pub id: String,
    /// How serious the finding is
    pub severity: Severity,
    /// What the finding is about
    pub category: FindingCategory,
    /// Rule or tool that produced the finding
    pub rule: String,
    /// File the finding points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line within `file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Human-readable description
    pub message: String,
    /// Suggested fix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl AuditFinding {
    /// Create a finding with no location or remediation
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        category: FindingCategory,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            category,
            rule: rule.into(),
            file: None,
            line: None,
            message: message.into(),
            remediation: None,
        }
    }

    /// Pin the finding to a file and line
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Attach a suggested fix
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}

/// A single failing test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Test function name
    pub test: String,
    /// Package the test lives in
    #[serde(default)]
    pub package: String,
    /// First line of the failure message
    pub message: String,
    /// Captured output of the failing test
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

/// Summary of a test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Tests that passed
    pub passed: u32,
    /// Tests that failed
    pub failed: u32,
    /// Tests that were skipped
    pub skipped: u32,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Statement coverage percentage
    pub coverage: f64,
    /// Per-test failure detail
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TestFailure>,
    /// Command line that produced the report
    pub command: String,
}

/// Risk attached to a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Few files touched
    Low,
    /// Moderate change
    Medium,
    /// Wide change
    High,
}

impl RiskLevel {
    /// Risk derived from how many files a change touches.
    pub fn from_change_count(count: usize) -> Self {
        match count {
            0..=3 => Self::Low,
            4..=10 => Self::Medium,
            _ => Self::High,
        }
    }
}

/// Output of the plan stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOutput {
    /// Tasks to submit, in order
    pub subtasks: Vec<Task>,
}

/// Output of the code stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeOutput {
    /// Files the change touched
    pub files_changed: Vec<String>,
    /// Branch the change was made on
    pub branch: String,
    /// Risk derived from the size of the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
}

/// Output of the test stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestOutput {
    /// Parsed test run
    pub report: TestReport,
}

/// Output of the audit stage, with findings split into buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditOutput {
    /// Every finding, in discovery order
    pub findings: Vec<AuditFinding>,
    /// Blocking security and secret findings
    pub critical_findings: Vec<AuditFinding>,
    /// Style and lint findings
    pub lint_errors: Vec<AuditFinding>,
    /// Hard-coded credentials
    pub secret_findings: Vec<AuditFinding>,
    /// Dependency findings
    pub dependency_findings: Vec<AuditFinding>,
}

impl AuditOutput {
    /// Bucket findings the way the gates and the repair stage read them.
    pub fn from_findings(findings: Vec<AuditFinding>) -> Self {
        let mut output = Self::default();
        for finding in &findings {
            match finding.category {
                FindingCategory::Security | FindingCategory::Secret => {
                    if finding.severity.is_blocking() {
                        output.critical_findings.push(finding.clone());
                    }
                    if finding.category == FindingCategory::Secret {
                        output.secret_findings.push(finding.clone());
                    }
                }
                FindingCategory::Style | FindingCategory::Lint => {
                    output.lint_errors.push(finding.clone());
                }
                FindingCategory::Dependency => output.dependency_findings.push(finding.clone()),
                FindingCategory::License => {}
            }
        }
        output.findings = findings;
        output
    }
}

/// Output of the repair stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairOutput {
    /// Name of the repair approach taken
    pub strategy: String,
    /// Fixes that were applied
    pub applied_fixes: Vec<String>,
    /// Remediations proposed by the failure classifier
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Output of the optimize stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeOutput {
    /// Optimizations that ran
    pub optimizations: Vec<String>,
    /// Benchmark output before the change
    pub benchmark_before: String,
    /// Benchmark output after the change
    pub benchmark_after: String,
    /// Whether the suite still passes afterwards
    pub tests_still_pass: bool,
}

/// Which release operation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseAction {
    /// Build a release artifact
    Package,
    /// Bump the version
    Version,
    /// Deploy the current build
    Deploy,
    /// Roll back to the previous release
    Rollback,
    /// Package, version, then deploy
    Full,
}

impl ReleaseAction {
    /// Lowercase name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Version => "version",
            Self::Deploy => "deploy",
            Self::Rollback => "rollback",
            Self::Full => "full",
        }
    }
}

/// Output of the release stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseOutput {
    /// Operation that ran
    pub action: ReleaseAction,
    /// Version produced or deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Path of the built artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_path: Option<String>,
    /// Whether a deploy completed
    #[serde(default)]
    pub deployed: bool,
}

/// Stage-specific result payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    /// No stage payload
    #[default]
    None,
    /// Plan stage payload
    Plan(PlanOutput),
    /// Code stage payload
    Code(CodeOutput),
    /// Test stage payload
    Test(TestOutput),
    /// Audit stage payload
    Audit(AuditOutput),
    /// Repair stage payload
    Repair(RepairOutput),
    /// Optimize stage payload
    Optimize(OptimizeOutput),
    /// Release stage payload
    Release(ReleaseOutput),
}

impl StageOutput {
    /// Subtasks of a plan payload.
    pub fn subtasks(&self) -> Option<&[Task]> {
        match self {
            Self::Plan(plan) => Some(&plan.subtasks),
            _ => None,
        }
    }

    /// Test report of a test payload.
    pub fn test_report(&self) -> Option<&TestReport> {
        match self {
            Self::Test(test) => Some(&test.report),
            _ => None,
        }
    }

    /// Audit payload, if this is one.
    pub fn audit(&self) -> Option<&AuditOutput> {
        match self {
            Self::Audit(audit) => Some(audit),
            _ => None,
        }
    }

    /// Risk level of a code payload.
    pub fn risk_level(&self) -> Option<RiskLevel> {
        match self {
            Self::Code(code) => code.risk_level,
            _ => None,
        }
    }

    /// True when the audit payload carries critical findings.
    pub fn has_critical_findings(&self) -> bool {
        self.audit()
            .is_some_and(|audit| !audit.critical_findings.is_empty())
    }
}

/// Outcome of one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result belongs to
    pub task_id: TaskId,
    /// State the attempt left the task in
    pub state: TaskState,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Stage-specific payload
    #[serde(default)]
    pub output: StageOutput,
    /// Artifacts captured during the attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    /// Decisions the handler made
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<Decision>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How long the attempt ran
    pub duration: Duration,
}

impl TaskResult {
    /// Result whose state follows the success flag.
    pub fn new(task_id: TaskId, success: bool) -> Self {
        Self {
            task_id,
            state: TaskState::from_success(success),
            success,
            output: StageOutput::None,
            evidence: Vec::new(),
            decisions: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Failed result carrying an error message.
    pub fn failure(task_id: TaskId, error: impl Into<String>) -> Self {
        Self::new(task_id, false).with_error(error)
    }

    /// Set the stage payload.
    pub fn with_output(mut self, output: StageOutput) -> Self {
        self.output = output;
        self
    }

    /// Append evidence.
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// Append a decision.
    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decisions.push(decision);
        self
    }

    /// Set the error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Flip the result to failed, keeping everything else.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.success = false;
        self.state = TaskState::Failed;
        self.error = Some(error.into());
    }
}
