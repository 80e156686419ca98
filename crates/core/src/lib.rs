//! `fanout-core`: foundation building blocks for the orchestration domain.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod tenant;

pub use error::{DomainError, DomainResult};
pub use id::{ExecutionId, StepId, TenantId};
pub use tenant::{StaticTenantDirectory, TenantDirectory, TenantInfo};
