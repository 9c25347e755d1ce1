//! File path validation.
//!
//! # Responsibilities
//! - Decode percent-encoded input (repeatedly, to defeat double encoding)
//! - Reject traversal markers, home references and sensitive file names
//! - Resolve the path against the canonical project root and require it to
//!   stay strictly inside
//! - Enforce the optional extension allow-list
//!
//! # Design Decisions
//! - Containment is a component-wise prefix check on canonical paths, so
//!   symlinks and `/root-sibling` style names cannot escape
//! - Paths that do not exist yet resolve through their deepest existing ancestor
//! - Any filesystem error while resolving rejects the path

use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::config::PathConfig;
use crate::security::rules::{Severity, ValidationCategory, ValidationError};

const MAX_DECODE_ROUNDS: usize = 3;

/// Validates file paths requested by callers.
#[derive(Debug, Clone)]
pub struct PathValidator {
    project_root: PathBuf,
    allowed_extensions: HashSet<String>,
    sensitive_names: HashSet<String>,
}

impl PathValidator {
    pub fn new(config: &PathConfig) -> Self {
        Self {
            project_root: config.project_root.clone(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            sensitive_names: config
                .sensitive_names
                .iter()
                .map(|n| n.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Validate `requested` and return its canonical location.
    pub fn validate(&self, requested: &str) -> Result<PathBuf, ValidationError> {
        let decoded = decode(requested)?;
        if decoded.trim().is_empty() {
            return Err(reject(ValidationCategory::Shape, Severity::Low, "Empty path"));
        }
        if decoded.contains('\0') {
            return Err(reject(
                ValidationCategory::PathPattern,
                Severity::Critical,
                "Path contains NUL byte",
            ));
        }
        if decoded.contains("..") {
            return Err(reject(
                ValidationCategory::PathPattern,
                Severity::High,
                "Path traversal ('..') is not allowed",
            ));
        }
        if decoded.contains('~') {
            return Err(reject(
                ValidationCategory::PathPattern,
                Severity::High,
                "Home directory references ('~') are not allowed",
            ));
        }

        let candidate = Path::new(&*decoded);
        self.check_sensitive(candidate)?;

        let root = fs::canonicalize(&self.project_root).map_err(|e| {
            tracing::error!(root = %self.project_root.display(), error = %e, "Project root cannot be resolved");
            reject(
                ValidationCategory::PathPattern,
                Severity::High,
                "Project root unavailable",
            )
        })?;

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        let resolved = canonicalize_lenient(&joined).map_err(|_| {
            reject(
                ValidationCategory::PathPattern,
                Severity::Medium,
                "Path cannot be resolved",
            )
        })?;

        let inside = match resolved.strip_prefix(&root) {
            Ok(relative) => relative,
            Err(_) => {
                return Err(reject(
                    ValidationCategory::PathPattern,
                    Severity::Critical,
                    "Path escapes the project root",
                ))
            }
        };
        if inside.as_os_str().is_empty() {
            return Err(reject(
                ValidationCategory::PathPattern,
                Severity::Medium,
                "Path must point inside the project root",
            ));
        }
        // symlinks may have resolved into a sensitive location
        self.check_sensitive(inside)?;

        if !self.allowed_extensions.is_empty() {
            let extension = resolved
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if !self.allowed_extensions.contains(&extension) {
                return Err(reject(
                    ValidationCategory::AllowList,
                    Severity::Medium,
                    format!("File extension '{extension}' is not allowed"),
                ));
            }
        }

        Ok(resolved)
    }

    pub fn is_valid(&self, requested: &str) -> bool {
        self.validate(requested).is_ok()
    }

    fn check_sensitive(&self, path: &Path) -> Result<(), ValidationError> {
        for component in path.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_string_lossy().to_ascii_lowercase();
            let stem = name.split('.').next().unwrap_or_default();
            if self.sensitive_names.contains(&name) || self.sensitive_names.contains(stem) {
                return Err(reject(
                    ValidationCategory::PathPattern,
                    Severity::Critical,
                    format!("Access to sensitive file '{name}' is not allowed"),
                ));
            }
        }
        Ok(())
    }
}

fn reject(category: ValidationCategory, severity: Severity, reason: impl Into<String>) -> ValidationError {
    ValidationError::new(category, severity, reason)
}

/// Percent-decode until stable.
fn decode(input: &str) -> Result<Cow<'_, str>, ValidationError> {
    let mut current: Cow<'_, str> = Cow::Borrowed(input);
    for _ in 0..MAX_DECODE_ROUNDS {
        let next = percent_decode_str(&current)
            .decode_utf8()
            .map_err(|_| {
                reject(
                    ValidationCategory::PathPattern,
                    Severity::High,
                    "Path is not valid UTF-8 after decoding",
                )
            })?
            .into_owned();
        if next == current {
            return Ok(current);
        }
        current = Cow::Owned(next);
    }
    Err(reject(
        ValidationCategory::PathPattern,
        Severity::High,
        "Path is encoded too many times",
    ))
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
fn canonicalize_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
                    return Err(e);
                };
                missing.push(name.to_os_string());
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, PathValidator) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("reports")).unwrap();
        fs::write(dir.path().join("reports/summary.csv"), "a,b\n").unwrap();
        let validator = PathValidator::new(&PathConfig {
            project_root: dir.path().to_path_buf(),
            ..PathConfig::default()
        });
        (dir, validator)
    }

    #[test]
    fn test_accepts_paths_inside_root() {
        let (dir, v) = project();
        let resolved = v.validate("reports/summary.csv").unwrap();
        assert_eq!(
            resolved,
            fs::canonicalize(dir.path()).unwrap().join("reports/summary.csv")
        );
        assert!(v.is_valid("reports/new_output.json"));
        assert!(v.is_valid("reports%2Fsummary.csv"));
    }

    #[test]
    fn test_rejects_traversal_and_home() {
        let (_dir, v) = project();
        for path in [
            "../../etc/passwd",
            "~/.ssh/id_rsa",
            "..%2F..%2Fetc%2Fpasswd",
            "%2E%2E/%2E%2E/etc/passwd",
            "%7E%2F.ssh%2Fid_rsa",
            "%252e%252e%252fetc%252fpasswd",
        ] {
            let err = v.validate(path).unwrap_err();
            assert_eq!(err.category, ValidationCategory::PathPattern, "{path}");
        }
    }

    #[test]
    fn test_rejects_sensitive_names() {
        let (_dir, v) = project();
        assert!(!v.is_valid("config/.env"));
        assert!(!v.is_valid("keys/id_rsa.pub"));
        assert!(!v.is_valid(".git/config"));
    }

    #[test]
    fn test_rejects_absolute_outside_root() {
        let (_dir, v) = project();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("data.csv");
        fs::write(&outside, "x").unwrap();

        let err = v.validate(outside.to_str().unwrap()).unwrap_err();
        assert!(err.reason.contains("escapes"), "{}", err.reason);
    }

    #[test]
    fn test_root_itself_is_not_a_file() {
        let (dir, v) = project();
        assert!(!v.is_valid(dir.path().to_str().unwrap()));
        assert!(!v.is_valid("."));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (dir, v) = project();
        let other = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(other.path(), dir.path().join("link")).unwrap();
        assert!(!v.is_valid("link/anything.csv"));
    }

    #[test]
    fn test_extension_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        let v = PathValidator::new(&PathConfig {
            project_root: dir.path().to_path_buf(),
            allowed_extensions: vec!["csv".into(), ".JSON".into()],
            ..PathConfig::default()
        });
        assert!(v.is_valid("out/report.CSV"));
        assert!(v.is_valid("out/report.json"));
        let err = v.validate("out/script.sh").unwrap_err();
        assert_eq!(err.category, ValidationCategory::AllowList);
    }

    #[test]
    fn test_missing_root_fails_closed() {
        let v = PathValidator::new(&PathConfig {
            project_root: PathBuf::from("/nonexistent/gatekeeper-root"),
            ..PathConfig::default()
        });
        assert!(!v.is_valid("reports/summary.csv"));
    }
}
