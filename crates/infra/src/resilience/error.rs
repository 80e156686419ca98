use thiserror::Error;

use fanout_executions::{ErrorCategory, ErrorKind, TenantFailure};

/// Classified failure of a tenant-scoped operation.
///
/// Collaborators construct these directly; the isolation layer decides what
/// to do from `kind` alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category} ({kind}): {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            kind,
            category,
            message: message.into(),
        }
    }

    /// Kind follows from the category.
    pub fn categorized(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(category.default_kind(), category, message)
    }

    pub fn transient(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, category, message)
    }

    pub fn permanent(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, category, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, ErrorCategory::InvalidRequest, message)
    }

    pub fn breaker_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BreakerOpen, ErrorCategory::CircuitOpen, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, ErrorCategory::Internal, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_breaker_open(&self) -> bool {
        self.kind == ErrorKind::BreakerOpen
    }
}

impl From<OperationError> for TenantFailure {
    fn from(err: OperationError) -> Self {
        TenantFailure::new(err.kind, err.category, err.message)
    }
}

impl From<&OperationError> for TenantFailure {
    fn from(err: &OperationError) -> Self {
        TenantFailure::new(err.kind, err.category, err.message.clone())
    }
}
