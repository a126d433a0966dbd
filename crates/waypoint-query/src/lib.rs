//! # Waypoint Query
//!
//! Orchestration around the sandbox: resolves script sources, binds the
//! capability bundle to the requesting user, enforces the per-user rate
//! limit, records the audit trail, and runs KR progress batches.

pub mod data_api;
pub mod executor;
pub mod rate_limit;

pub use data_api::StoreDataApi;
pub use executor::{ExecutionContext, KrProgress, QueryExecutor, QuerySource};
pub use rate_limit::RateLimiter;
