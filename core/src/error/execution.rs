use thiserror::Error;

use crate::security::SecurityIssue;

/// Errors raised before a script process is spawned.
///
/// Anything that happens after spawn (timeout, cancellation, non-zero exit,
/// spawn failure) is reported through `ExecutionResult` instead.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported shell: {0}")]
    UnsupportedShell(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("security violation: {}", format_issues(.issues))]
    SecurityViolation { issues: Vec<SecurityIssue> },

    #[error("capacity exceeded: {limit} script(s) already running")]
    CapacityExceeded { limit: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by front-ends for exit codes and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Security,
    Capacity,
    Io,
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::UnsupportedShell(_) | Self::InvalidParameter { .. } => {
                ErrorKind::Validation
            }
            Self::SecurityViolation { .. } => ErrorKind::Security,
            Self::CapacityExceeded { .. } => ErrorKind::Capacity,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

fn format_issues(issues: &[SecurityIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::IssueCategory;

    #[test]
    fn security_violation_lists_every_issue() {
        let err = ExecutionError::SecurityViolation {
            issues: vec![
                SecurityIssue::new(IssueCategory::DiskFormat, 3, "disk formatting command"),
                SecurityIssue::new(IssueCategory::Shutdown, 7, "system shutdown"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("line 3"));
        assert!(text.contains("line 7"));
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn parameter_errors_are_validation_errors() {
        let err = ExecutionError::InvalidParameter {
            name: "count".into(),
            reason: "expected number".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "invalid parameter 'count': expected number");
    }
}
