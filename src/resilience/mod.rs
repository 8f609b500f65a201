//! Resilience layer for remote calls
//!
//! Balance lookups and job submissions go through [`ResilientExecutor`]:
//! - Exponential backoff with jitter on transient errors
//! - Per-dependency circuit breakers with a single half-open probe
//! - Call counters for reporting
//!
//! [`RateLimiter`] paces submissions across concurrent wallets.

pub mod breaker;
pub mod executor;
pub mod policy;
pub mod rate_limit;

pub use breaker::{BreakerSettings, BreakerSnapshot, CircuitState};
pub use executor::{Attempted, ResilienceStats, ResilientExecutor};
pub use policy::{RetryPolicy, RetrySettings};
pub use rate_limit::RateLimiter;

/// Dependency name for the Solana RPC node
pub const DEP_RPC: &str = "rpc";
/// Dependency name shared by all job submissions
pub const DEP_SUBMIT: &str = "submit";
