//! Failure classification engine.
//!
//! Matches failure text against a registry of known patterns and turns
//! the hits into remediation suggestions for the repair stage.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Severity, TaskResult};

/// Broad class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Build or type-check error
    Compilation,
    /// Test assertion or harness failure
    Test,
    /// Panic or crash at run time
    Runtime,
    /// Static analysis complaint
    Lint,
    /// Security scanner finding
    Security,
}

/// A known failure signature.
#[derive(Debug, Clone)]
pub struct FailurePattern {
    /// Stable pattern identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Broad class of failure
    pub category: FailureCategory,
    /// Drives the base confidence
    pub severity: Severity,
    /// What the pattern means
    pub description: String,
    /// Suggested fix
    pub remediation: String,
    regex: Regex,
}

impl FailurePattern {
    /// Compile a pattern. Matching is case-insensitive.
    pub fn new(
        id: &str,
        name: &str,
        category: FailureCategory,
        severity: Severity,
        pattern: &str,
        description: &str,
        remediation: &str,
    ) -> DomainResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| DomainError::InvalidPattern {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            category,
            severity,
            description: description.to_string(),
            remediation: remediation.to_string(),
            regex,
        })
    }

    /// Compiled matcher.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// One pattern's hits within a piece of text.
#[derive(Debug, Clone)]
pub struct FailureClassification {
    /// Pattern that matched
    pub pattern: Arc<FailurePattern>,
    /// Matched text, in order of appearance
    pub matches: Vec<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Remediations for this pattern
    pub suggestions: Vec<String>,
}

/// Base confidence by severity, +0.1 for repeated matches, capped at 1.0.
pub fn confidence_for(severity: Severity, match_count: usize) -> f64 {
    let base = match severity {
        Severity::Critical => 0.9,
        Severity::High => 0.8,
        Severity::Medium => 0.7,
        Severity::Low | Severity::Info => 0.5,
    };
    if match_count > 1 {
        f64::min(base + 0.1, 1.0)
    } else {
        base
    }
}

/// Classifications above this confidence produce suggestions.
const SUGGESTION_THRESHOLD: f64 = 0.7;

/// Pattern registry and classifier.
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    patterns: Vec<Arc<FailurePattern>>,
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationEngine {
    /// Engine loaded with the default pattern set.
    pub fn new() -> Self {
        let patterns = default_patterns()
            .into_iter()
            .filter_map(|p| match p {
                Ok(pattern) => Some(Arc::new(pattern)),
                Err(e) => {
                    error!(error = %e, "skipping default failure pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Engine with no patterns.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Classify free text against every pattern.
    pub fn classify(&self, text: &str) -> Vec<FailureClassification> {
        if text.is_empty() {
            return Vec::new();
        }
        let text = text.to_lowercase();
        self.patterns
            .iter()
            .filter_map(|pattern| {
                let matches: Vec<String> = pattern
                    .regex
                    .find_iter(&text)
                    .map(|m| m.as_str().to_string())
                    .collect();
                if matches.is_empty() {
                    return None;
                }
                Some(FailureClassification {
                    pattern: Arc::clone(pattern),
                    confidence: confidence_for(pattern.severity, matches.len()),
                    suggestions: vec![pattern.remediation.clone()],
                    matches,
                })
            })
            .collect()
    }

    /// Classify everything a failed result carries: its error, textual
    /// evidence and test failures. Successful results yield nothing.
    pub fn parse_result(&self, result: &TaskResult) -> Vec<FailureClassification> {
        if result.success {
            return Vec::new();
        }

        let mut classifications = Vec::new();
        if let Some(error) = &result.error {
            classifications.extend(self.classify(error));
        }
        for evidence in result.evidence.iter().filter(|e| e.kind.is_textual()) {
            classifications.extend(self.classify(&evidence.content));
        }
        if let Some(report) = result.output.test_report() {
            for failure in &report.failures {
                classifications.extend(self.classify(&failure.message));
                classifications.extend(self.classify(&failure.output));
            }
        }
        classifications
    }

    /// De-duplicated suggestions from confident classifications, first seen first.
    pub fn get_suggestions(&self, classifications: &[FailureClassification]) -> Vec<String> {
        let mut seen = HashSet::new();
        classifications
            .iter()
            .filter(|c| c.confidence > SUGGESTION_THRESHOLD)
            .flat_map(|c| c.suggestions.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    /// Register a pattern, replacing one with the same id in place.
    pub fn add_pattern(&mut self, pattern: FailurePattern) {
        let pattern = Arc::new(pattern);
        if let Some(slot) = self.patterns.iter_mut().find(|p| p.id == pattern.id) {
            *slot = pattern;
        } else {
            self.patterns.push(pattern);
        }
    }

    /// Pattern with `id`, if registered.
    pub fn pattern(&self, id: &str) -> Option<Arc<FailurePattern>> {
        self.patterns.iter().find(|p| p.id == id).cloned()
    }

    /// Every registered pattern, in registration order.
    pub fn patterns(&self) -> &[Arc<FailurePattern>] {
        &self.patterns
    }
}

fn default_patterns() -> Vec<DomainResult<FailurePattern>> {
    use FailureCategory::{Compilation, Runtime, Test};
    use Severity::{Critical, High, Medium};

    vec![
        FailurePattern::new(
            "nil-pointer",
            "Nil Pointer Dereference",
            Runtime,
            Critical,
            r"panic: runtime error: invalid memory address or nil pointer dereference",
            "Attempt to dereference a nil pointer",
            "Add nil check before dereferencing",
        ),
        FailurePattern::new(
            "undefined-variable",
            "Undefined Variable",
            Compilation,
            High,
            r"undefined: (\w+)",
            "Variable or function is not defined",
            "Define the variable or import the package",
        ),
        FailurePattern::new(
            "type-mismatch",
            "Type Mismatch",
            Compilation,
            High,
            r"cannot use .* \(type .*\) as type .*",
            "Type mismatch in assignment or function call",
            "Fix type conversion or use correct type",
        ),
        FailurePattern::new(
            "import-error",
            "Import Error",
            Compilation,
            Medium,
            r"cannot find package|package .* is not in goroot",
            "Package import error",
            "Run go mod tidy or install missing package",
        ),
        FailurePattern::new(
            "test-failure",
            "Test Failure",
            Test,
            High,
            r"fail:\s+(\S+)",
            "Unit test failed",
            "Fix the test or the code being tested",
        ),
        FailurePattern::new(
            "lint-error",
            "Lint Error",
            FailureCategory::Lint,
            Medium,
            r"(golangci-lint|go vet|staticcheck|clippy).*error",
            "Code style or lint error",
            "Fix linting issues",
        ),
        FailurePattern::new(
            "race-condition",
            "Race Condition",
            Runtime,
            Critical,
            r"warning: data race|race detected",
            "Data race detected",
            "Add synchronization (mutex, channel, etc.)",
        ),
        FailurePattern::new(
            "out-of-bounds",
            "Index Out of Bounds",
            Runtime,
            Critical,
            r"index out of range|index out of bounds",
            "Array or slice index out of bounds",
            "Add bounds checking before indexing",
        ),
        FailurePattern::new(
            "timeout",
            "Timeout",
            Test,
            Medium,
            r"timeout|context deadline exceeded",
            "Operation timed out",
            "Increase timeout or optimize slow operation",
        ),
        FailurePattern::new(
            "deadlock",
            "Deadlock",
            Runtime,
            Critical,
            r"fatal error: all goroutines are asleep - deadlock",
            "Deadlock detected",
            "Review synchronization logic",
        ),
        FailurePattern::new(
            "rust-panic",
            "Rust Panic",
            Runtime,
            Critical,
            r"thread '[^']*' panicked at",
            "A Rust thread panicked",
            "Replace the panicking unwrap or index with error handling",
        ),
        FailurePattern::new(
            "borrow-check",
            "Borrow Check Error",
            Compilation,
            High,
            r"error\[e0(?:382|499|502|505|506|597)\]|cannot borrow .* as mutable",
            "Ownership or borrowing rule violated",
            "Restructure ownership, clone, or shorten the borrow",
        ),
    ]
}
