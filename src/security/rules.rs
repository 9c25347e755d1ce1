//! Validation rules and the error every validator reports.

use std::fmt;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// What kind of check rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCategory {
    ForbiddenKeyword,
    InjectionPattern,
    PathPattern,
    SizeLimit,
    AllowList,
    Shape,
    RateLimit,
}

impl ValidationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCategory::ForbiddenKeyword => "forbidden_keyword",
            ValidationCategory::InjectionPattern => "injection_pattern",
            ValidationCategory::PathPattern => "path_pattern",
            ValidationCategory::SizeLimit => "size_limit",
            ValidationCategory::AllowList => "allow_list",
            ValidationCategory::Shape => "shape",
            ValidationCategory::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for ValidationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A rejected input: machine-readable category plus human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub category: ValidationCategory,
    pub severity: Severity,
    pub reason: String,
}

impl ValidationError {
    pub fn new(category: ValidationCategory, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            reason: reason.into(),
        }
    }
}

/// What a rule matches against.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    Pattern(Regex),
    Threshold(usize),
}

/// A single named check.
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: &'static str,
    pub category: ValidationCategory,
    pub matcher: RuleMatcher,
    pub severity: Severity,
}

impl ValidationRule {
    /// Build a pattern rule. Patterns are compiled from literals in this crate,
    /// so a failure here is a programming error caught by tests.
    pub fn pattern(
        name: &'static str,
        category: ValidationCategory,
        pattern: &str,
        severity: Severity,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            category,
            matcher: RuleMatcher::Pattern(Regex::new(pattern)?),
            severity,
        })
    }

    pub fn threshold(
        name: &'static str,
        category: ValidationCategory,
        limit: usize,
        severity: Severity,
    ) -> Self {
        Self {
            name,
            category,
            matcher: RuleMatcher::Threshold(limit),
            severity,
        }
    }

    /// Whether `input` violates this rule.
    pub fn violated_by(&self, input: &str) -> bool {
        match &self.matcher {
            RuleMatcher::Pattern(re) => re.is_match(input),
            RuleMatcher::Threshold(limit) => input.len() > *limit,
        }
    }

    pub fn to_error(&self, reason: impl Into<String>) -> ValidationError {
        ValidationError::new(self.category, self.severity, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules() {
        let rule = ValidationRule::pattern(
            "comment",
            ValidationCategory::InjectionPattern,
            r"--",
            Severity::High,
        )
        .unwrap();
        assert!(rule.violated_by("SELECT 1 -- trailing"));
        assert!(!rule.violated_by("SELECT 1"));

        let limit = ValidationRule::threshold("len", ValidationCategory::SizeLimit, 3, Severity::Low);
        assert!(limit.violated_by("abcd"));
        assert!(!limit.violated_by("abc"));
        assert_eq!(limit.to_error("too long").category, ValidationCategory::SizeLimit);
    }
}
