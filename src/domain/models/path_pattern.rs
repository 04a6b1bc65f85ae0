//! Path globs used by policies and agent contracts.
//!
//! `*` on its own matches any path. Otherwise `**` spans any number of
//! path segments (including none), `*` stays within one segment, `?` is a
//! single non-separator character and everything else is literal.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};

/// A compiled path glob.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile a glob; empty globs and runs of three or more `*` are rejected.
    pub fn new(pattern: &str) -> DomainResult<Self> {
        let invalid = |reason: &str| DomainError::InvalidPattern {
            id: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("empty glob"));
        }
        if pattern.contains("***") {
            return Err(invalid("more than two consecutive '*'"));
        }

        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Whether `path` matches; a leading `./` is ignored.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(normalize(path))
    }

    /// Glob as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PathPattern {}

impl Serialize for PathPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// One-shot match; a pattern that does not compile matches nothing.
pub fn path_matches(path: &str, pattern: &str) -> bool {
    PathPattern::new(pattern).is_ok_and(|p| p.matches(path))
}

fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

fn glob_to_regex(pattern: &str) -> String {
    let pattern = normalize(pattern);
    if pattern == "*" {
        return String::from("^.*$");
    }

    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}
