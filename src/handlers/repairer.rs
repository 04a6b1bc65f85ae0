//! Repair stage: turns an upstream test or audit failure into fixes.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{command_evidence, run_or_report, HandlerContext};
use crate::domain::models::{
    AgentContract, AuditFinding, Decision, EvidenceKind, FindingCategory, RepairOutput,
    StageInput, StageOutput, Task, TaskResult, TestReport,
};
use crate::domain::ports::StageHandler;
use crate::services::tool_runner::ToolRunner;

/// Formats, runs the fixer and attaches classifier suggestions for upstream failures.
pub struct Repairer {
    ctx: HandlerContext,
    contract: AgentContract,
    runner: ToolRunner,
}

/// Strategy and fixes for a failing test run.
pub fn analyze_test_failures(report: &TestReport, min_coverage: f64) -> (String, Vec<String>) {
    let mut fixes = Vec::new();
    for failure in &report.failures {
        let text = format!("{}\n{}", failure.message, failure.output).to_lowercase();
        let fix = if text.contains("nil pointer") {
            "add nil pointer checks".to_string()
        } else if text.contains("undefined") {
            "add missing definitions".to_string()
        } else if text.contains("cannot use") {
            "fix type mismatches".to_string()
        } else {
            format!("fix test in {}", failure.package)
        };
        fixes.push(fix);
    }
    if report.coverage < min_coverage {
        fixes.push("increase test coverage".to_string());
    }
    (format!("repair_{}_failures", report.failures.len()), fixes)
}

/// Fixes for audit findings.
pub fn analyze_audit_findings<'a>(
    findings: impl IntoIterator<Item = &'a AuditFinding>,
) -> Vec<String> {
    findings
        .into_iter()
        .filter_map(|finding| match finding.category {
            FindingCategory::Lint => Some(format!(
                "fix lint in {}: {}",
                finding.file.as_deref().unwrap_or("unknown file"),
                finding.message
            )),
            FindingCategory::Security => Some(
                finding
                    .remediation
                    .clone()
                    .unwrap_or_else(|| format!("fix security issue: {}", finding.message)),
            ),
            FindingCategory::Secret => {
                Some("remove exposed secrets, use environment variables".to_string())
            }
            _ => None,
        })
        .collect()
}

impl Repairer {
    /// Repairer over the shared context.
    pub fn new(ctx: HandlerContext) -> Self {
        let contract = AgentContract::new("repairer", "Repairer")
            .with_allowed_paths(&["src/**", "cmd/**", "internal/**", "pkg/**"])
            .with_tools(&["go", "go fmt", "go fix"])
            .requiring_tests();
        let runner = ctx.runner(&contract);
        Self {
            ctx,
            contract,
            runner,
        }
    }

    /// Strategy, fixes and the failed result they were derived from.
    fn analyze<'t>(&self, task: &'t Task) -> Option<(String, Vec<String>, &'t TaskResult)> {
        match &task.inputs.upstream {
            StageInput::TestFailure { result } => {
                let (strategy, fixes) = result
                    .output
                    .test_report()
                    .map(|report| analyze_test_failures(report, self.ctx.min_coverage))
                    .unwrap_or_else(|| ("repair_0_failures".to_string(), Vec::new()));
                Some((strategy, fixes, result))
            }
            StageInput::AuditFindings { result } => {
                let fixes = result
                    .output
                    .audit()
                    .map(|audit| {
                        analyze_audit_findings(audit.critical_findings.iter().chain(
                            audit.lint_errors.iter().filter(|f| f.severity.is_blocking()),
                        ))
                    })
                    .unwrap_or_default();
                Some(("repair_audit_findings".to_string(), fixes, result))
            }
            StageInput::Predecessor { .. } | StageInput::None => None,
        }
    }
}

#[async_trait]
impl StageHandler for Repairer {
    fn name(&self) -> &'static str {
        "repairer"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let Some((strategy, fixes, upstream)) = self.analyze(task) else {
            return TaskResult::failure(task.id, "no failed result to repair").with_decision(
                Decision::new("repairer", "repair", "no upstream failure supplied", 0.75),
            );
        };

        let classifications = self.ctx.evaluation.parse_result(upstream);
        let suggestions = self.ctx.evaluation.get_suggestions(&classifications);
        debug!(
            strategy = %strategy,
            fixes = fixes.len(),
            suggestions = suggestions.len(),
            "repair plan ready"
        );

        let mut result = TaskResult::new(task.id, true);
        let mut tooling_ok = true;
        for spec in [&self.ctx.commands.fmt, &self.ctx.commands.fix] {
            let out = run_or_report(&self.runner, spec).await;
            if !out.success() {
                tooling_ok = false;
                result = result.with_evidence(command_evidence(EvidenceKind::Log, spec, &out));
            }
        }
        let applied_fixes = if tooling_ok { fixes } else { Vec::new() };

        let decision = Decision::new(
            "repairer",
            "repair",
            format!("analyzing and repairing failures ({strategy})"),
            0.75,
        )
        .with_metadata("upstream_task", serde_json::json!(upstream.task_id.value()))
        .with_metadata("suggestions", serde_json::json!(suggestions));

        if applied_fixes.is_empty() && strategy.is_empty() {
            result.mark_failed("no fixes applied");
        }
        result
            .with_output(StageOutput::Repair(RepairOutput {
                strategy,
                applied_fixes,
                suggestions,
            }))
            .with_decision(decision)
    }
}
