//! Test stage: runs the suite and reports counts, failures and coverage.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{command_evidence, run_or_report, HandlerContext};
use crate::domain::models::{
    AgentContract, Decision, EvidenceKind, StageOutput, Task, TaskResult, TestFailure, TestOutput,
    TestReport,
};
use crate::domain::ports::{CommandOutput, StageHandler};
use crate::services::tool_runner::ToolRunner;

static COVERAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"coverage:\s*(\d+\.?\d*)%").ok());

/// Runs the suite and a coverage pass, then parses the report.
pub struct Tester {
    ctx: HandlerContext,
    contract: AgentContract,
    runner: ToolRunner,
}

impl Tester {
    /// Tester over the shared context.
    pub fn new(ctx: HandlerContext) -> Self {
        let contract = AgentContract::new("tester", "Tester")
            .with_allowed_paths(&["**/*_test.go"])
            .with_tools(&["go", "go test"]);
        let runner = ctx.runner(&contract);
        Self {
            ctx,
            contract,
            runner,
        }
    }
}

/// Count results in test runner output.
///
/// A failed run counts `FAIL:` lines as failures and lines mentioning
/// `PASS:` or `ok` as passes; a clean run only counts `PASS:` lines and
/// `ok` lines that report coverage. Indented lines after a failure are
/// kept as its output, and a trailing `FAIL <package>` line names the
/// package of the failures before it.
pub fn parse_test_output(output: &str, run_ok: bool, duration: Duration) -> TestReport {
    let mut report = TestReport {
        duration,
        ..TestReport::default()
    };
    let mut open_failure: Option<usize> = None;
    for line in output.lines() {
        if run_ok {
            if line.contains("PASS:") || (line.contains("ok") && line.contains("coverage")) {
                report.passed += 1;
            }
            continue;
        }
        if line.contains("FAIL:") {
            report.failed += 1;
            let mut words = line.split_whitespace();
            let test = words
                .clone()
                .skip_while(|w| *w != "FAIL:")
                .nth(1)
                .or_else(|| words.nth(1));
            open_failure = test.map(|test| {
                report.failures.push(TestFailure {
                    test: test.to_string(),
                    message: line.trim().to_string(),
                    ..TestFailure::default()
                });
                report.failures.len() - 1
            });
            continue;
        }
        if let Some(package) = line.strip_prefix("FAIL").and_then(|rest| {
            rest.starts_with(char::is_whitespace)
                .then(|| rest.split_whitespace().next())
                .flatten()
        }) {
            for failure in report.failures.iter_mut().filter(|f| f.package.is_empty()) {
                failure.package = package.to_string();
            }
            open_failure = None;
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(failure) = open_failure.and_then(|i| report.failures.get_mut(i)) {
                if !failure.output.is_empty() {
                    failure.output.push('\n');
                }
                failure.output.push_str(line.trim());
                continue;
            }
        }
        open_failure = None;
        if line.contains("PASS:") || line.contains("ok") {
            report.passed += 1;
        } else if line.contains("SKIP:") {
            report.skipped += 1;
        }
    }
    report
}

/// First `coverage: N%` figure in `output`.
pub fn parse_coverage(output: &str) -> Option<f64> {
    COVERAGE
        .as_ref()?
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[async_trait]
impl StageHandler for Tester {
    fn name(&self) -> &'static str {
        "tester"
    }

    fn contract(&self) -> &AgentContract {
        &self.contract
    }

    async fn execute(&self, _cancel: &CancellationToken, task: &Task) -> TaskResult {
        let decision = Decision::new("tester", "test", "executing test suite", 0.95);
        let test = &self.ctx.commands.test;

        let started = Instant::now();
        let out: CommandOutput = run_or_report(&self.runner, test).await;
        let duration = started.elapsed();

        let mut report = parse_test_output(&out.output, out.success(), duration);
        report.command = test.to_string();

        let coverage_out = run_or_report(&self.runner, &self.ctx.commands.coverage).await;
        if let Some(coverage) =
            parse_coverage(&coverage_out.output).or_else(|| parse_coverage(&out.output))
        {
            report.coverage = coverage;
        }

        let success = report.failed == 0 && out.success();
        let mut result = TaskResult::new(task.id, success)
            .with_evidence(
                command_evidence(EvidenceKind::Report, test, &out)
                    .with_description("Test execution output"),
            )
            .with_decision(decision)
            .with_duration(duration);
        if !success {
            let error = match report.failed {
                0 => format!("test command failed: {test}"),
                n => format!("{n} test(s) failed"),
            };
            result = result.with_error(error);
        }
        result.with_output(StageOutput::Test(TestOutput { report }))
    }
}
