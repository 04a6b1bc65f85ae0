//! Guardrail policies and agent contracts.

use serde::{Deserialize, Serialize};

use crate::domain::models::path_pattern::path_matches;

/// Kind of guardrail a policy expresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Result-validation gate
    Gate,
    /// Admission constraint on paths
    #[default]
    Constraint,
    /// Free-form rule set
    Rule,
}

/// What a rule does when its condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Permit the action
    Allow,
    /// Refuse the action
    Deny,
    /// Permit but log a warning
    Warn,
}

/// Condition and action pair carried by a rule policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Condition expression, stored verbatim
    pub condition: String,
    /// What to do when the condition holds
    pub action: RuleAction,
    /// Message shown when the rule fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A named, switchable path policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// What the policy protects
    #[serde(default)]
    pub description: String,
    /// Kind of guardrail
    #[serde(default)]
    pub kind: PolicyKind,
    /// Disabled policies are skipped during admission
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Agent the policy is scoped to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Globs a path must match when non-empty
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Globs that deny a path
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    /// Extra rules for `rule` policies
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

const fn default_enabled() -> bool {
    true
}

impl Policy {
    /// Enabled constraint policy with no paths.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind: PolicyKind::default(),
            enabled: true,
            agent_id: None,
            allowed_paths: Vec::new(),
            forbidden_paths: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Scope the policy to one agent.
    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Add an allowed glob.
    pub fn allow_path(mut self, glob: impl Into<String>) -> Self {
        self.allowed_paths.push(glob.into());
        self
    }

    /// Add a forbidden glob.
    pub fn forbid_path(mut self, glob: impl Into<String>) -> Self {
        self.forbidden_paths.push(glob.into());
        self
    }

    /// Append a rule.
    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Turn the policy off.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Every glob the policy declares.
    pub fn globs(&self) -> impl Iterator<Item = &str> {
        self.allowed_paths
            .iter()
            .chain(&self.forbidden_paths)
            .map(String::as_str)
    }
}

/// Static capabilities a stage handler declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContract {
    /// Agent identifier, e.g. `coder`
    pub id: String,
    /// Display name
    pub name: String,
    /// Globs the agent may touch
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Globs the agent must not touch
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    /// Programs (or `program subcommand` pairs) the agent may run
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tests must pass before the stage may report success
    #[serde(default)]
    pub required_tests: bool,
}

impl AgentContract {
    /// Contract with no paths, tools or test requirement.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Replace the allowed globs.
    pub fn with_allowed_paths(mut self, globs: &[&str]) -> Self {
        self.allowed_paths = globs.iter().map(ToString::to_string).collect();
        self
    }

    /// Replace the forbidden globs.
    pub fn with_forbidden_paths(mut self, globs: &[&str]) -> Self {
        self.forbidden_paths = globs.iter().map(ToString::to_string).collect();
        self
    }

    /// Replace the allowed tools.
    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.allowed_tools = tools.iter().map(ToString::to_string).collect();
        self
    }

    /// Require passing tests.
    pub fn requiring_tests(mut self) -> Self {
        self.required_tests = true;
        self
    }

    /// Forbidden globs win; a non-empty allow list must then match.
    pub fn validate_path(&self, path: &str) -> bool {
        if self.forbidden_paths.iter().any(|g| path_matches(path, g)) {
            return false;
        }
        self.allowed_paths.is_empty() || self.allowed_paths.iter().any(|g| path_matches(path, g))
    }

    /// Whether `program` (or a `program subcommand` entry) is allowed.
    pub fn allows_tool(&self, program: &str) -> bool {
        self.allowed_tools.iter().any(|tool| {
            tool == program
                || tool
                    .split_whitespace()
                    .next()
                    .is_some_and(|head| head == program)
        })
    }
}
