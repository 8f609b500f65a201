//! Batch Deployer Library
//!
//! Resilient multi-wallet batch deployment of pump.fun tokens:
//! password-encrypted wallet vault, retry + circuit breaker around remote
//! calls, deterministic target distribution and a concurrent batch engine.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod planner;
pub mod resilience;
pub mod vault;

// Re-export commonly used types
pub use config::DeployerConfig;
pub use engine::{BatchConfig, BatchEngine, BatchResult, Target, WalletSource};
pub use error::{Error, ErrorCategory, Result};
pub use planner::{plan, CostModel, DeploymentPlan};
pub use resilience::{ResilientExecutor, RetryPolicy};
pub use vault::CredentialVault;
