//! Error types for the islnet environment abstraction.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a [`NetworkControl`](crate::NetworkControl) implementation.
///
/// The engines do not interpret substrate-specific text; every failure is a
/// single "control operation failed" condition carrying the operation name.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A substrate operation failed (command error, missing element, ...)
    #[error("Control operation `{operation}` failed: {reason}")]
    OperationFailed {
        operation: String,
        reason: String,
    },

    /// The operation did not complete within its timeout
    #[error("Control operation `{operation}` timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: String,
        after: Duration,
    },
}

impl ControlError {
    /// Creates an operation failure.
    pub fn failed(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a timeout failure.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Name of the operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            Self::OperationFailed { operation, .. } | Self::Timeout { operation, .. } => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ControlError::failed("add_link", "bridge s3 missing");
        assert_eq!(err.operation(), "add_link");
        assert_eq!(
            err.to_string(),
            "Control operation `add_link` failed: bridge s3 missing"
        );

        let err = ControlError::timeout("run_on_host", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Control operation `run_on_host` timed out after 1500ms");
    }
}
