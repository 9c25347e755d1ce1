//! SQL query validation.
//!
//! # Checks (in order)
//! - non-empty, within the length limit
//! - no forbidden keyword as a whole token outside string literals
//! - starts with an allow-listed keyword (read-only statements)
//! - no known injection signature
//!
//! # Design Decisions
//! - Token matching instead of substring matching: `deleted_at` is not `DELETE`
//! - Keyword and structure checks ignore string literal contents, tautology
//!   checks look at the raw text
//! - Unbalanced quotes are rejected rather than guessed at

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::SqlConfig;
use crate::security::rules::{Severity, ValidationCategory, ValidationError, ValidationRule};

/// Signatures checked against the query with string literals blanked out.
static STRUCTURAL_SIGNATURES: LazyLock<Vec<ValidationRule>> = LazyLock::new(|| {
    [
        ("stacked statements", r";\s*\S", Severity::Critical),
        ("UNION SELECT", r"(?i)\bUNION\b(\s+ALL)?\s+SELECT\b", Severity::High),
        ("SQL comment", r"--|/\*|\*/", Severity::High),
        (
            "time-based probe",
            r"(?i)\b(SLEEP|BENCHMARK|PG_SLEEP)\s*\(|\bWAITFOR\s+DELAY\b",
            Severity::High,
        ),
        (
            "file access",
            r"(?i)\bLOAD_FILE\s*\(|\bINTO\s+(OUT|DUMP)FILE\b",
            Severity::Critical,
        ),
        ("boolean tautology", r"(?i)\bOR\s+TRUE\b", Severity::High),
    ]
    .into_iter()
    .map(|(name, pattern, severity)| {
        ValidationRule::pattern(name, ValidationCategory::InjectionPattern, pattern, severity)
            .expect("built-in SQL signature must compile")
    })
    .collect()
});

/// Signatures checked against the raw query.
static LITERAL_SIGNATURES: LazyLock<Vec<ValidationRule>> = LazyLock::new(|| {
    vec![ValidationRule::pattern(
        "quoted tautology",
        ValidationCategory::InjectionPattern,
        r"(?i)'\s*OR\s+'[^']*'\s*=\s*'",
        Severity::Critical,
    )
    .expect("built-in SQL signature must compile")]
});

static COMPARISON_TAUTOLOGY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bOR\s+'?(\w+)'?\s*=\s*'?(\w+)'?")
        .expect("built-in SQL signature must compile")
});

/// Validates read-only SQL queries.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    allowed: Vec<String>,
    forbidden: HashSet<String>,
    length: ValidationRule,
}

impl SqlValidator {
    pub fn new(config: &SqlConfig) -> Self {
        Self {
            allowed: config
                .allowed_keywords
                .iter()
                .map(|k| k.to_ascii_uppercase())
                .collect(),
            forbidden: config
                .forbidden_keywords
                .iter()
                .map(|k| k.to_ascii_uppercase())
                .collect(),
            length: ValidationRule::threshold(
                "max query length",
                ValidationCategory::SizeLimit,
                config.max_query_length,
                Severity::Medium,
            ),
        }
    }

    pub fn validate(&self, query: &str) -> Result<(), ValidationError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::new(
                ValidationCategory::Shape,
                Severity::Low,
                "Empty query",
            ));
        }
        if self.length.violated_by(query) {
            return Err(self.length.to_error(format!(
                "Query too long: {} bytes exceeds limit",
                query.len()
            )));
        }

        let Some(structure) = strip_literals(query) else {
            return Err(ValidationError::new(
                ValidationCategory::InjectionPattern,
                Severity::High,
                "Potential SQL injection: unbalanced quotes",
            ));
        };

        let tokens: Vec<String> = structure
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_ascii_uppercase())
            .collect();

        if let Some(keyword) = tokens.iter().find(|t| self.forbidden.contains(*t)) {
            return Err(ValidationError::new(
                ValidationCategory::ForbiddenKeyword,
                Severity::Critical,
                format!("Forbidden keyword: {keyword}"),
            ));
        }

        match tokens.first() {
            Some(first) if self.allowed.contains(first) => {}
            _ => {
                return Err(ValidationError::new(
                    ValidationCategory::AllowList,
                    Severity::High,
                    format!("Query must start with one of: {}", self.allowed.join(", ")),
                ))
            }
        }

        if let Some(rule) = STRUCTURAL_SIGNATURES
            .iter()
            .find(|rule| rule.violated_by(&structure))
        {
            return Err(rule.to_error(format!("Potential SQL injection: {}", rule.name)));
        }
        if let Some(rule) = LITERAL_SIGNATURES.iter().find(|rule| rule.violated_by(query)) {
            return Err(rule.to_error(format!("Potential SQL injection: {}", rule.name)));
        }
        if has_comparison_tautology(query) {
            return Err(ValidationError::new(
                ValidationCategory::InjectionPattern,
                Severity::Critical,
                "Potential SQL injection: always-true OR condition",
            ));
        }

        Ok(())
    }

    pub fn is_valid(&self, query: &str) -> bool {
        self.validate(query).is_ok()
    }
}

/// `OR x = x` with identical operands, e.g. `OR 1=1` or `OR 'a'='a'`.
fn has_comparison_tautology(query: &str) -> bool {
    COMPARISON_TAUTOLOGY
        .captures_iter(query)
        .any(|caps| caps[1].eq_ignore_ascii_case(&caps[2]))
}

/// Blank out the contents of single-quoted literals. `None` if a literal is
/// left open.
fn strip_literals(query: &str) -> Option<String> {
    let mut out = String::with_capacity(query.len());
    let mut in_literal = false;
    for c in query.chars() {
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
        } else if !in_literal {
            out.push(c);
        }
    }
    (!in_literal).then_some(out)
}

/// Accept a dynamic table or column name only if it is made of `[A-Za-z0-9_.]`.
pub fn sanitize_identifier(name: &str) -> Result<String, ValidationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid {
        tracing::debug!(identifier = %name, "Identifier rejected");
        return Err(ValidationError::new(
            ValidationCategory::Shape,
            Severity::Medium,
            format!("Invalid identifier: {name:?}"),
        ));
    }
    Ok(name.to_string())
}
