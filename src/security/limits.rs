//! Request payload limits.
//!
//! # Responsibilities
//! - Enforce maximum serialized payload size
//! - Require a non-empty JSON object carrying the required fields
//! - Enforce maximum string length and nesting depth anywhere in the payload
//!
//! # Design Decisions
//! - Size is checked first so oversized payloads are rejected before walking them
//! - A payload that cannot be re-serialized is rejected

use serde_json::Value;

use crate::config::RequestConfig;
use crate::security::rules::{Severity, ValidationCategory, ValidationError};

/// Validates the envelope of a structured request.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    max_request_bytes: usize,
    max_string_length: usize,
    max_depth: usize,
    required_fields: Vec<String>,
}

impl RequestValidator {
    pub fn new(config: &RequestConfig) -> Self {
        Self {
            max_request_bytes: config.max_request_bytes,
            max_string_length: config.max_string_length,
            max_depth: config.max_depth,
            required_fields: config.required_fields.clone(),
        }
    }

    pub fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        let size = serde_json::to_vec(payload)
            .map_err(|e| {
                ValidationError::new(
                    ValidationCategory::Shape,
                    Severity::Medium,
                    format!("Request cannot be serialized: {e}"),
                )
            })?
            .len();
        if size > self.max_request_bytes {
            return Err(ValidationError::new(
                ValidationCategory::SizeLimit,
                Severity::Medium,
                format!(
                    "Request too large: {size} bytes exceeds {} bytes",
                    self.max_request_bytes
                ),
            ));
        }

        let Value::Object(fields) = payload else {
            return Err(ValidationError::new(
                ValidationCategory::Shape,
                Severity::Low,
                "Request must be a JSON object",
            ));
        };
        if fields.is_empty() {
            return Err(ValidationError::new(
                ValidationCategory::Shape,
                Severity::Low,
                "Request is empty",
            ));
        }

        for field in &self.required_fields {
            if fields.get(field).map_or(true, Value::is_null) {
                return Err(ValidationError::new(
                    ValidationCategory::Shape,
                    Severity::Low,
                    format!("Missing required field: {field}"),
                ));
            }
        }

        self.check_strings(payload, "$")?;

        let depth = depth_of(payload);
        if depth > self.max_depth {
            return Err(ValidationError::new(
                ValidationCategory::Shape,
                Severity::Medium,
                format!("Request nested too deeply: depth {depth} exceeds {}", self.max_depth),
            ));
        }

        Ok(())
    }

    fn check_strings(&self, value: &Value, at: &str) -> Result<(), ValidationError> {
        match value {
            Value::String(s) if s.len() > self.max_string_length => Err(ValidationError::new(
                ValidationCategory::SizeLimit,
                Severity::Medium,
                format!(
                    "String at {at} too long: {} bytes exceeds {}",
                    s.len(),
                    self.max_string_length
                ),
            )),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| self.check_strings(item, &format!("{at}[{i}]"))),
            Value::Object(map) => map.iter().try_for_each(|(key, item)| {
                if key.len() > self.max_string_length {
                    return Err(ValidationError::new(
                        ValidationCategory::SizeLimit,
                        Severity::Medium,
                        format!(
                            "Key at {at} too long: {} bytes exceeds {}",
                            key.len(),
                            self.max_string_length
                        ),
                    ));
                }
                self.check_strings(item, &format!("{at}.{key}"))
            }),
            _ => Ok(()),
        }
    }
}

/// Nesting depth; scalars are depth 0, `{}` and `[]` are depth 1.
fn depth_of(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(config: RequestConfig) -> RequestValidator {
        RequestValidator::new(&config)
    }

    #[test]
    fn test_accepts_well_formed_request() {
        let v = validator(RequestConfig::default());
        assert!(v.validate(&json!({"query": "SELECT 1", "limit": 10})).is_ok());
    }

    #[test]
    fn test_shape() {
        let v = validator(RequestConfig {
            required_fields: vec!["query".into()],
            ..RequestConfig::default()
        });
        for bad in [json!([1, 2]), json!({}), json!({"limit": 1}), json!({"query": null})] {
            let err = v.validate(&bad).unwrap_err();
            assert_eq!(err.category, ValidationCategory::Shape, "{bad}");
        }
    }

    #[test]
    fn test_size_limits() {
        let v = validator(RequestConfig {
            max_request_bytes: 64,
            max_string_length: 8,
            ..RequestConfig::default()
        });
        let err = v.validate(&json!({"blob": "x".repeat(100)})).unwrap_err();
        assert_eq!(err.category, ValidationCategory::SizeLimit);
        assert!(err.reason.contains("Request too large"));

        let err = v.validate(&json!({"nested": {"list": ["ok", "far too long"]}})).unwrap_err();
        assert_eq!(err.category, ValidationCategory::SizeLimit);
        assert!(err.reason.contains("$.nested.list[1]"), "{}", err.reason);
    }

    #[test]
    fn test_key_length_limit() {
        let v = validator(RequestConfig {
            max_string_length: 8,
            ..RequestConfig::default()
        });
        let err = v.validate(&json!({ ("k".repeat(64)): 1 })).unwrap_err();
        assert_eq!(err.category, ValidationCategory::SizeLimit);
        assert!(err.reason.starts_with("Key at $ too long"), "{}", err.reason);

        let err = v
            .validate(&json!({"outer": [{ ("x".repeat(9)): "ok" }]}))
            .unwrap_err();
        assert!(err.reason.contains("$.outer[0]"), "{}", err.reason);
        assert!(v.validate(&json!({"exactly8": "ok"})).is_ok());
    }

    #[test]
    fn test_depth_limit() {
        let v = validator(RequestConfig {
            max_depth: 3,
            ..RequestConfig::default()
        });
        assert!(v.validate(&json!({"a": {"b": {"c": 1}}})).is_ok());
        let err = v.validate(&json!({"a": {"b": {"c": [1]}}})).unwrap_err();
        assert_eq!(err.category, ValidationCategory::Shape);
    }
}
