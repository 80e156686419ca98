//! HTTP API: operational surface over the registry, isolation layer and
//! ingress pool.

pub mod app;
pub mod middleware;
