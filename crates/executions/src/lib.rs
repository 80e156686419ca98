//! Execution domain module.
//!
//! Business rules for multi-tenant executions, implemented as deterministic
//! domain logic (no IO, no clocks, no storage). Callers pass `now` in.

pub mod execution;
pub mod query;
pub mod request;
pub mod summary;
pub mod taxonomy;

pub use execution::{
    CustomerExecution, Execution, ExecutionStatus, NewExecution, Priority, Step, StepStatus,
    TenantOutcome, TenantStatus, aggregate_status,
};
pub use query::ExecutionFilter;
pub use request::{DistributionRequest, RequestError};
pub use summary::{ErrorSummary, ExecutionMetrics};
pub use taxonomy::{ErrorCategory, ErrorKind, TenantFailure};
