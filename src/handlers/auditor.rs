//! Audit stage: lint, dangerous-pattern scan, secret scan and dependency
//! listing. Read-only.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{command_evidence, run_or_report, HandlerContext};
use crate::domain::models::{
    AgentContract, AuditFinding, AuditOutput, Decision, EvidenceKind, FindingCategory, Severity,
    StageOutput, Task, TaskResult,
};
use crate::domain::ports::StageHandler;
use crate::services::tool_runner::ToolRunner;

/// Substrings flagged wherever they appear in scanned source.
const DANGEROUS_PATTERNS: &[(&str, &str, Severity)] = &[
    ("exec.Command", "Direct command execution detected", Severity::High),
    ("eval(", "Use of eval detected", Severity::Critical),
    ("os.Getenv", "Environment variable access", Severity::Low),
];

struct SecretRule {
    id: &'static str,
    severity: Severity,
    regex: Regex,
}

static SECRET_RULES: LazyLock<Vec<SecretRule>> = LazyLock::new(|| {
    [
        ("api-key", Severity::Critical, r"sk-[a-zA-Z0-9_-]{20,}"),
        (
            "generic-token",
            Severity::Critical,
            r#"["']?(?:api_key|apikey|token|secret)["']?\s*[:=]\s*["']?([a-zA-Z0-9_.-]{20,})["']?"#,
        ),
        ("bearer-token", Severity::High, r"Bearer\s+[a-zA-Z0-9_.-]{16,}"),
        (
            "password",
            Severity::High,
            r#"["']?password["']?\s*[:=]\s*["']([^"'\s,}]+)["']"#,
        ),
    ]
    .into_iter()
    .filter_map(|(id, severity, pattern)| match Regex::new(pattern) {
        Ok(regex) => Some(SecretRule { id, severity, regex }),
        Err(e) => {
            warn!(rule = id, error = %e, "skipping invalid secret rule");
            None
        }
    })
    .collect()
});

/// `path:line:` prefix of compiler and linter diagnostics.
static LOCATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\./)?([^\s:]+):(\d+)(?::\d+)?:").ok());

/// Runs vet and lint, scans sources for dangerous patterns and secrets, lists dependencies.
pub struct Auditor {
    ctx: HandlerContext,
    contract: AgentContract,
    runner: ToolRunner,
}

/// Collects findings and numbers them per category.
#[derive(Default)]
struct Findings(Vec<AuditFinding>);

impl Findings {
    fn push(
        &mut self,
        severity: Severity,
        category: FindingCategory,
        rule: &str,
        message: impl Into<String>,
    ) -> &mut AuditFinding {
        let n = self.0.iter().filter(|f| f.category == category).count();
        let id = format!("{}-{n}", category.as_str());
        self.0
            .push(AuditFinding::new(id, severity, category, rule, message));
        let last = self.0.len() - 1;
        &mut self.0[last]
    }
}

fn locate(finding: &mut AuditFinding, line: &str) {
    let caps = LOCATION.as_ref().and_then(|re| re.captures(line));
    if let Some(caps) = caps {
        finding.file = Some(caps[1].to_string());
        finding.line = caps[2].parse().ok();
    }
}

impl Auditor {
    /// Auditor over the shared context.
    pub fn new(ctx: HandlerContext) -> Self {
        let contract = AgentContract::new("auditor", "Auditor")
            .with_tools(&["go", "go vet", "golangci-lint"]);
        let runner = ctx.runner(&contract);
        Self {
            ctx,
            contract,
            runner,
        }
    }

    async fn check_lint(&self, findings: &mut Findings, result: &mut TaskResult) {
        let vet = &self.ctx.commands.vet;
        let out = run_or_report(&self.runner, vet).await;
        if !out.success() && !out.output.trim().is_empty() {
            for line in out.output.lines() {
                if line.trim().is_empty() || line.contains("no packages") || line.starts_with('#') {
                    continue;
                }
                let finding = findings.push(Severity::High, FindingCategory::Lint, "go vet", line.trim());
                locate(finding, line);
            }
            result.evidence.push(command_evidence(EvidenceKind::Log, vet, &out));
        }

        let lint = &self.ctx.commands.lint;
        let out = run_or_report(&self.runner, lint).await;
        for line in out.output.lines() {
            if line.contains(':') && (line.contains("warning") || line.contains("error")) {
                let finding =
                    findings.push(Severity::Medium, FindingCategory::Lint, &lint.program, line.trim());
                locate(finding, line);
            }
        }
    }

    /// Files to scan: the task's inputs plus everything the working tree
    /// reports as changed.
    async fn changed_files(&self, task: &Task) -> Vec<String> {
        let mut files: BTreeSet<String> = task.inputs.files.iter().cloned().collect();
        match self.ctx.workspace.diff().await {
            Ok(diff) => {
                files.extend(
                    diff.lines()
                        .filter_map(|l| l.split_whitespace().last())
                        .map(str::to_string),
                );
            }
            Err(e) => warn!(error = %e, "could not read working tree diff"),
        }
        files.into_iter().collect()
    }

    fn scan_file(findings: &mut Findings, file: &str, contents: &str) {
        for (number, line) in contents.lines().enumerate() {
            let line_no = u32::try_from(number + 1).unwrap_or(u32::MAX);
            for (pattern, message, severity) in DANGEROUS_PATTERNS {
                if line.contains(pattern) {
                    let finding = findings.push(
                        *severity,
                        FindingCategory::Security,
                        "dangerous_pattern",
                        *message,
                    );
                    finding.file = Some(file.to_string());
                    finding.line = Some(line_no);
                    finding.remediation = Some("Review usage of dangerous functions".to_string());
                }
            }
            for rule in SECRET_RULES.iter() {
                if rule.regex.is_match(line) {
                    let finding = findings.push(
                        rule.severity,
                        FindingCategory::Secret,
                        rule.id,
                        format!("possible {} exposed", rule.id.replace('-', " ")),
                    );
                    finding.file = Some(file.to_string());
                    finding.line = Some(line_no);
                    finding.remediation =
                        Some("remove exposed secrets, use environment variables".to_string());
                }
            }
        }
    }

    async fn check_sources(&self, task: &Task, findings: &mut Findings) {
        let root = self.ctx.workspace.repo_path().to_path_buf();
        for file in self.changed_files(task).await {
            match tokio::fs::read_to_string(root.join(&file)).await {
                Ok(contents) => Self::scan_file(findings, &file, &contents),
                Err(e) => debug!(file = %file, error = %e, "skipping unreadable file"),
            }
        }
    }

    async fn check_dependencies(&self, findings: &mut Findings, result: &mut TaskResult) {
        let deps = &self.ctx.commands.deps;
        let out = run_or_report(&self.runner, deps).await;
        if out.success() {
            let count = out.output.lines().filter(|l| !l.trim().is_empty()).count();
            result.evidence.push(
                command_evidence(EvidenceKind::Report, deps, &out)
                    .with_description(format!("{count} dependencies")),
            );
        } else {
            findings.push(
                Severity::Medium,
                FindingCategory::Dependency,
                "dependency_listing",
                format!("could not list dependencies: {}", out.output.trim()),
            );
        }
    }
}

#[async_trait]
impl StageHandler for Auditor {
    fn name(&self) -> &'static str {
        "auditor"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let decision = Decision::new("auditor", "audit", "auditing code changes", 0.9);
        let mut result = TaskResult::new(task.id, true).with_decision(decision);
        let mut findings = Findings::default();

        self.check_lint(&mut findings, &mut result).await;
        self.check_sources(task, &mut findings).await;
        self.check_dependencies(&mut findings, &mut result).await;

        let audit = AuditOutput::from_findings(findings.0);
        if !audit.critical_findings.is_empty() {
            result.mark_failed(format!(
                "{} critical finding(s)",
                audit.critical_findings.len()
            ));
        }
        result.with_output(StageOutput::Audit(audit))
    }
}
