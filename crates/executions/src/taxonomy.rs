//! Typed failure taxonomy.
//!
//! Collaborators return a classified failure explicitly; nothing here inspects
//! error message text.

use serde::{Deserialize, Serialize};

/// How a failure must be handled by the retry machinery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or unknown tenant. Never retried.
    Validation,
    /// Timeout, throttling, transient unavailability. Retried with backoff.
    Transient,
    /// Authentication, authorization, malformed downstream request. Not retried.
    Permanent,
    /// Synthetic: the tenant's circuit breaker rejected the call.
    BreakerOpen,
    /// The operation was abandoned because the process is shutting down.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// Whether this kind counts against the tenant's circuit breaker.
    pub fn trips_breaker(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Permanent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained failure category, used for dashboards and error summaries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Throttling,
    Network,
    ServiceUnavailable,
    Authentication,
    Authorization,
    InvalidRequest,
    NotFound,
    UnknownTenant,
    CircuitOpen,
    Internal,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::Timeout,
        ErrorCategory::Throttling,
        ErrorCategory::Network,
        ErrorCategory::ServiceUnavailable,
        ErrorCategory::Authentication,
        ErrorCategory::Authorization,
        ErrorCategory::InvalidRequest,
        ErrorCategory::NotFound,
        ErrorCategory::UnknownTenant,
        ErrorCategory::CircuitOpen,
        ErrorCategory::Internal,
    ];

    /// The kind a failure of this category has when the producer does not say otherwise.
    pub fn default_kind(self) -> ErrorKind {
        match self {
            ErrorCategory::Timeout
            | ErrorCategory::Throttling
            | ErrorCategory::Network
            | ErrorCategory::ServiceUnavailable => ErrorKind::Transient,
            ErrorCategory::Authentication
            | ErrorCategory::Authorization
            | ErrorCategory::InvalidRequest
            | ErrorCategory::NotFound
            | ErrorCategory::Internal => ErrorKind::Permanent,
            ErrorCategory::UnknownTenant => ErrorKind::Validation,
            ErrorCategory::CircuitOpen => ErrorKind::BreakerOpen,
        }
    }

    /// Critical failures need operator attention regardless of volume.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            ErrorCategory::Authentication | ErrorCategory::Authorization | ErrorCategory::Internal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Throttling => "throttling",
            ErrorCategory::Network => "network",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::UnknownTenant => "unknown_tenant",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl core::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified tenant-level failure, as recorded on a `CustomerExecution`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantFailure {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub message: String,
}

impl TenantFailure {
    pub fn new(kind: ErrorKind, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            kind,
            category,
            message: message.into(),
        }
    }

    /// Failure whose kind follows from its category.
    pub fn categorized(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(category.default_kind(), category, message)
    }

    pub fn transient(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, category, message)
    }

    pub fn permanent(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, category, message)
    }

    pub fn breaker_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BreakerOpen, ErrorCategory::CircuitOpen, message)
    }
}

impl core::fmt::Display for TenantFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({}): {}", self.category, self.kind, self.message)
    }
}
