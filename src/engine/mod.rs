//! Batch execution engine
//!
//! Turns a target list and a wallet source into a running batch: signers are
//! initialized, the planner assigns targets, and one worker per wallet
//! submits its jobs through the resilience layer.

pub mod batch;
pub mod submitter;
pub mod types;

pub use batch::BatchEngine;
pub use submitter::{
    BalanceSource, PumpPortalCreator, PumpPortalSettings, RpcBalanceSource, Submitter,
};
pub use types::{
    BatchConfig, BatchResult, DeploymentJob, EngineStats, ExecutionOptions, JobFailure,
    JobOutcome, JobState, ProgressEvent, SetupReport, Target, TxReference, WalletSource,
    WalletStats,
};
