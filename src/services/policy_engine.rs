//! Admission policies and result-validation gates.
//!
//! Answers two questions for the orchestrator: may this task run, and
//! does this result clear every required quality bar. Gates read the typed
//! [`StageOutput`]; a gate whose payload is absent passes.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Config, FindingCategory, PathPattern, Policy, RiskLevel, Severity, StageOutput, Task,
    TaskResult,
};

/// Gate predicate over a result.
pub type GateFn = Arc<dyn Fn(&TaskResult) -> bool + Send + Sync>;

/// A named predicate that either blocks success or only observes it.
#[derive(Clone)]
pub struct Gate {
    /// Stable gate identifier, e.g. `tests-pass`
    pub id: String,
    /// Display name
    pub name: String,
    /// What the gate checks
    pub description: String,
    /// Required gates block success; advisory gates only log
    pub required: bool,
    validator: GateFn,
}

impl Gate {
    /// Gate that blocks success when it fails.
    pub fn required<F>(id: &str, name: &str, description: &str, validator: F) -> Self
    where
        F: Fn(&TaskResult) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            required: true,
            validator: Arc::new(validator),
        }
    }

    /// Gate that only logs when it fails.
    pub fn advisory<F>(id: &str, name: &str, description: &str, validator: F) -> Self
    where
        F: Fn(&TaskResult) -> bool + Send + Sync + 'static,
    {
        Self {
            required: false,
            ..Self::required(id, name, description, validator)
        }
    }

    /// Run the predicate.
    pub fn check(&self, result: &TaskResult) -> bool {
        (self.validator)(result)
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.id)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Result of running one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    /// Gate that ran
    pub gate_id: String,
    /// Whether the gate is required
    pub required: bool,
    /// Whether the result cleared it
    pub passed: bool,
}

impl GateOutcome {
    /// Required and failed.
    pub fn blocks(&self) -> bool {
        self.required && !self.passed
    }
}

#[derive(Debug, Clone)]
struct CompiledPolicy {
    policy: Policy,
    allowed: Vec<PathPattern>,
    forbidden: Vec<PathPattern>,
}

impl CompiledPolicy {
    fn compile(policy: Policy) -> DomainResult<Self> {
        let allowed = policy
            .allowed_paths
            .iter()
            .map(|g| PathPattern::new(g))
            .collect::<DomainResult<Vec<_>>>()?;
        let forbidden = policy
            .forbidden_paths
            .iter()
            .map(|g| PathPattern::new(g))
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self {
            policy,
            allowed,
            forbidden,
        })
    }

    fn forbids(&self, path: &str) -> bool {
        self.forbidden.iter().any(|p| p.matches(path))
    }

    /// Not forbidden, and matched by the allow list when it has entries.
    fn permits(&self, path: &str) -> bool {
        !self.forbids(path)
            && (self.allowed.is_empty() || self.allowed.iter().any(|p| p.matches(path)))
    }
}

/// Policy engine.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policies: Vec<CompiledPolicy>,
    gates: Vec<Gate>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Engine with the default gate set and no policies.
    pub fn new() -> Self {
        Self::with_min_coverage(70.0)
    }

    /// Default gates with a custom coverage threshold.
    pub fn with_min_coverage(min_coverage: f64) -> Self {
        Self {
            policies: Vec::new(),
            gates: default_gates(min_coverage),
        }
    }

    /// Engine seeded from the `gates` and `policies` config sections.
    pub fn from_config(config: &Config) -> DomainResult<Self> {
        let mut engine = Self::with_min_coverage(config.gates.min_coverage);
        for policy in &config.policies {
            engine.add_policy(policy.clone())?;
        }
        Ok(engine)
    }

    /// Deny when any enabled policy forbids a file the task references.
    pub fn allow_task(&self, task: &Task) -> bool {
        for compiled in self.policies.iter().filter(|c| c.policy.enabled) {
            if let Some(file) = task.inputs.files.iter().find(|f| compiled.forbids(f)) {
                debug!(
                    task_id = %task.id,
                    policy = %compiled.policy.id,
                    file = %file,
                    "task references a forbidden path"
                );
                return false;
            }
        }
        true
    }

    /// True when every required gate passes.
    pub fn validate_result(&self, result: &TaskResult) -> bool {
        self.gates
            .iter()
            .filter(|g| g.required)
            .all(|g| g.check(result))
    }

    /// Run every gate; failing advisory gates are logged, not enforced.
    pub fn evaluate_gates(&self, result: &TaskResult) -> Vec<GateOutcome> {
        self.gates
            .iter()
            .map(|gate| {
                let passed = gate.check(result);
                if !passed && !gate.required {
                    warn!(task_id = %result.task_id, gate = %gate.id, "advisory gate failed");
                }
                GateOutcome {
                    gate_id: gate.id.clone(),
                    required: gate.required,
                    passed,
                }
            })
            .collect()
    }

    /// Ids of the required gates the result fails.
    pub fn failed_required_gates(&self, result: &TaskResult) -> Vec<String> {
        self.evaluate_gates(result)
            .into_iter()
            .filter(GateOutcome::blocks)
            .map(|o| o.gate_id)
            .collect()
    }

    /// Add a policy; its globs are compiled up front.
    pub fn add_policy(&mut self, policy: Policy) -> DomainResult<()> {
        self.policies.push(CompiledPolicy::compile(policy)?);
        Ok(())
    }

    /// Add a gate, replacing any gate with the same id.
    pub fn add_gate(&mut self, gate: Gate) {
        if let Some(existing) = self.gates.iter_mut().find(|g| g.id == gate.id) {
            *existing = gate;
        } else {
            self.gates.push(gate);
        }
    }

    /// Registered gates, in evaluation order.
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Registered policies, in insertion order.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().map(|c| &c.policy)
    }

    /// First policy scoped to `agent_id`.
    pub fn policy_for_agent(&self, agent_id: &str) -> Option<&Policy> {
        self.policies()
            .find(|p| p.agent_id.as_deref() == Some(agent_id))
    }

    /// Check `path` against one policy's allow and deny lists.
    ///
    /// Registered policies reuse their compiled globs; any other policy is
    /// compiled for this call and a malformed glob is an error.
    pub fn validate_path(&self, path: &str, policy: &Policy) -> DomainResult<bool> {
        if let Some(compiled) = self.policies.iter().find(|c| c.policy == *policy) {
            return Ok(compiled.permits(path));
        }
        Ok(CompiledPolicy::compile(policy.clone())?.permits(path))
    }
}

fn default_gates(min_coverage: f64) -> Vec<Gate> {
    vec![
        Gate::required(
            "fmt-lint",
            "Format and Lint",
            "Code must pass fmt and lint checks",
            |result| {
                result
                    .output
                    .audit()
                    .map_or(true, |a| !a.lint_errors.iter().any(|f| f.severity.is_blocking()))
            },
        ),
        Gate::required(
            "tests-pass",
            "Tests Must Pass",
            "All tests must pass",
            |result| result.output.test_report().map_or(true, |r| r.failed == 0),
        ),
        Gate::required(
            "coverage",
            "Minimum Coverage",
            "Code coverage must meet minimum threshold",
            move |result| {
                result
                    .output
                    .test_report()
                    .map_or(true, |r| r.coverage >= min_coverage)
            },
        ),
        Gate::required(
            "secrets",
            "No Secrets",
            "No secrets should be exposed",
            |result| {
                result.output.audit().map_or(true, |a| {
                    !a.secret_findings.iter().any(|f| {
                        f.category == FindingCategory::Secret && f.severity.is_blocking()
                    })
                })
            },
        ),
        Gate::required(
            "dependencies",
            "Dependency Security",
            "No critical CVEs in dependencies",
            |result| {
                result.output.audit().map_or(true, |a| {
                    !a.dependency_findings.iter().any(|f| {
                        f.category == FindingCategory::Dependency
                            && f.severity == Severity::Critical
                    })
                })
            },
        ),
        Gate::advisory(
            "risk-review",
            "Risk Review",
            "High-risk changes require review",
            |result| {
                if let StageOutput::Code(code) = &result.output {
                    if code.risk_level == Some(RiskLevel::High) {
                        warn!(
                            task_id = %result.task_id,
                            files = code.files_changed.len(),
                            "high-risk change needs review"
                        );
                    }
                }
                true
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AuditFinding, AuditOutput, CodeOutput, TaskId, TaskInputs, TaskType, TestOutput,
        TestReport,
    };

    fn test_result(failed: u32, coverage: f64) -> TaskResult {
        TaskResult::new(TaskId::new(1), true).with_output(StageOutput::Test(TestOutput {
            report: TestReport {
                passed: 10,
                failed,
                coverage,
                ..TestReport::default()
            },
        }))
    }

    fn audit_result(findings: Vec<AuditFinding>) -> TaskResult {
        TaskResult::new(TaskId::new(1), true)
            .with_output(StageOutput::Audit(AuditOutput::from_findings(findings)))
    }

    #[test]
    fn test_failing_test_fails_validation() {
        let engine = PolicyEngine::new();
        assert!(!engine.validate_result(&test_result(1, 90.0)));
        assert_eq!(engine.failed_required_gates(&test_result(1, 90.0)), vec!["tests-pass"]);
    }

    #[test]
    fn test_coverage_threshold_is_inclusive() {
        let engine = PolicyEngine::new();
        assert!(!engine.validate_result(&test_result(0, 65.0)));
        assert!(engine.validate_result(&test_result(0, 70.0)));
    }

    #[test]
    fn test_configured_coverage_threshold() {
        let engine = PolicyEngine::with_min_coverage(50.0);
        assert!(engine.validate_result(&test_result(0, 65.0)));
    }

    #[test]
    fn test_absent_payload_passes_every_gate() {
        let engine = PolicyEngine::new();
        let result = TaskResult::new(TaskId::new(1), true);
        assert!(engine.validate_result(&result));
        assert!(engine.evaluate_gates(&result).iter().all(|o| o.passed));
    }

    #[test]
    fn test_blocking_lint_error_fails_fmt_lint() {
        let engine = PolicyEngine::new();
        let high = AuditFinding::new("l1", Severity::High, FindingCategory::Lint, "vet", "bad");
        let medium = AuditFinding::new("l2", Severity::Medium, FindingCategory::Lint, "lint", "meh");
        assert!(!engine.validate_result(&audit_result(vec![high])));
        assert!(engine.validate_result(&audit_result(vec![medium])));
    }

    #[test]
    fn test_exposed_secret_fails_secrets_gate() {
        let engine = PolicyEngine::new();
        let secret = AuditFinding::new("k", Severity::Critical, FindingCategory::Secret, "key", "key");
        assert_eq!(
            engine.failed_required_gates(&audit_result(vec![secret])),
            vec!["secrets"]
        );
    }

    #[test]
    fn test_only_critical_dependency_fails() {
        let engine = PolicyEngine::new();
        let high = AuditFinding::new("d", Severity::High, FindingCategory::Dependency, "cve", "x");
        let critical =
            AuditFinding::new("d", Severity::Critical, FindingCategory::Dependency, "cve", "x");
        assert!(engine.validate_result(&audit_result(vec![high])));
        assert!(!engine.validate_result(&audit_result(vec![critical])));
    }

    #[test]
    fn test_risk_review_never_blocks() {
        let engine = PolicyEngine::new();
        let result = TaskResult::new(TaskId::new(1), true).with_output(StageOutput::Code(CodeOutput {
            files_changed: vec!["a".into(); 20],
            branch: "b".into(),
            risk_level: Some(RiskLevel::High),
        }));
        assert!(engine.validate_result(&result));
        let risk = engine
            .evaluate_gates(&result)
            .into_iter()
            .find(|o| o.gate_id == "risk-review")
            .unwrap();
        assert!(!risk.required);
        assert!(risk.passed);
    }

    #[test]
    fn test_forbidden_path_denies_admission() {
        let mut engine = PolicyEngine::new();
        engine
            .add_policy(Policy::new("no-vendor", "No vendor edits").forbid_path("vendor/**"))
            .unwrap();
        let task = Task::new(TaskType::Code, "edit")
            .with_inputs(TaskInputs::with_files(["vendor/lib.go"]));
        assert!(!engine.allow_task(&task));

        let ok = Task::new(TaskType::Code, "edit").with_inputs(TaskInputs::with_files(["src/a.go"]));
        assert!(engine.allow_task(&ok));
    }

    #[test]
    fn test_disabled_policy_is_ignored() {
        let mut engine = PolicyEngine::new();
        engine
            .add_policy(Policy::new("p", "p").forbid_path("*").disabled())
            .unwrap();
        let task = Task::new(TaskType::Code, "x").with_inputs(TaskInputs::with_files(["a.go"]));
        assert!(engine.allow_task(&task));
    }

    #[test]
    fn test_add_policy_rejects_malformed_glob() {
        let mut engine = PolicyEngine::new();
        assert!(engine.add_policy(Policy::new("bad", "bad").forbid_path("")).is_err());
        assert_eq!(engine.policies().count(), 0);
    }

    #[test]
    fn test_policy_for_agent_and_validate_path() {
        let mut engine = PolicyEngine::new();
        engine
            .add_policy(
                Policy::new("coder-paths", "Coder paths")
                    .for_agent("coder")
                    .allow_path("src/**")
                    .forbid_path("**/*_test.go"),
            )
            .unwrap();
        let policy = engine.policy_for_agent("coder").unwrap().clone();
        assert!(engine.validate_path("src/auth/login.go", &policy).unwrap());
        assert!(!engine.validate_path("src/auth/login_test.go", &policy).unwrap());
        assert!(!engine.validate_path("docs/x.md", &policy).unwrap());
        assert!(engine.policy_for_agent("tester").is_none());
    }

    #[test]
    fn test_validate_path_with_unregistered_policy() {
        let engine = PolicyEngine::new();
        let vendored = Policy::new("no-vendor", "No vendor").forbid_path("vendor/**");
        assert!(!engine.validate_path("vendor/lib.go", &vendored).unwrap());
        assert!(engine.validate_path("src/lib.go", &vendored).unwrap());

        let malformed = Policy::new("bad", "bad").forbid_path("");
        let err = engine.validate_path("src/lib.go", &malformed).unwrap_err();
        assert_eq!(err.error_kind(), "invalid_pattern");
    }

    #[test]
    fn test_add_gate_replaces_by_id() {
        let mut engine = PolicyEngine::new();
        let before = engine.gates().len();
        engine.add_gate(Gate::required("tests-pass", "Lenient", "always", |_| true));
        assert_eq!(engine.gates().len(), before);
        assert!(engine.validate_result(&test_result(3, 90.0)));

        engine.add_gate(Gate::advisory("style", "Style", "observe", |_| false));
        assert_eq!(engine.gates().len(), before + 1);
        assert!(engine.validate_result(&test_result(0, 90.0)));
    }
}
