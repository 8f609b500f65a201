//! Engine input, output and job types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::planner::{CostModel, DeploymentPlan};
use crate::vault::Secret;

/// One creation operation to deploy
///
/// The engine only reads `id` and `name`; everything else is passed through
/// to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Metadata URI for the created asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_uri: Option<String>,
    /// Social handle to resolve into a recipient address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            symbol: None,
            metadata_uri: None,
            handle: None,
            recipient: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Reference to the on-chain result of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReference {
    pub signature: String,
    /// Address of the created asset, when the protocol reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: String,
    pub message: String,
}

/// Code recorded for jobs whose worker task panicked
pub const WORKER_ABORTED: &str = "WORKER_ABORTED";

impl JobFailure {
    pub fn worker_aborted(message: impl Into<String>) -> Self {
        Self {
            code: WORKER_ABORTED.to_string(),
            message: message.into(),
        }
    }
}

impl From<&Error> for JobFailure {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// One unit of work in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentJob {
    pub id: Uuid,
    /// Position in the input target list
    pub index: usize,
    pub target: Target,
    /// Funding wallet address
    pub wallet: String,
    pub recipient: Option<String>,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<JobFailure>,
    pub tx: Option<TxReference>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentJob {
    pub fn new(index: usize, target: Target, wallet: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            recipient: target.recipient.clone(),
            target,
            wallet,
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
            tx: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn succeed(&mut self, tx: TxReference, attempts: u32) {
        self.state = JobState::Succeeded;
        self.attempts = attempts;
        self.tx = Some(tx);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, failure: JobFailure, attempts: u32) {
        self.state = JobState::Failed;
        self.attempts = attempts;
        self.last_error = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub fn outcome(&self) -> JobOutcome {
        JobOutcome {
            index: self.index,
            job_id: self.id,
            target_id: self.target.id.clone(),
            target_name: self.target.name.clone(),
            wallet: self.wallet.clone(),
            recipient: self.recipient.clone(),
            state: self.state,
            attempts: self.attempts,
            tx: self.tx.clone(),
            error: self.last_error.clone(),
            duration_ms: match (self.started_at, self.finished_at) {
                (Some(s), Some(f)) => Some((f - s).num_milliseconds().max(0) as u64),
                _ => None,
            },
        }
    }
}

/// Final view of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub index: usize,
    pub job_id: Uuid,
    pub target_id: String,
    pub target_name: String,
    pub wallet: String,
    /// Address resolved from the target's handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub state: JobState,
    pub attempts: u32,
    pub tx: Option<TxReference>,
    pub error: Option<JobFailure>,
    pub duration_ms: Option<u64>,
}

/// Sent after every job reaches a terminal state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub wallet: String,
    pub target_name: String,
    pub outcome: JobOutcome,
}

/// Per-wallet counters for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStats {
    pub address: String,
    pub label: Option<String>,
    pub assigned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub balance_lamports: Option<u64>,
    pub low_balance: bool,
}

/// Summary of one batch, computed once from the final job states
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub dry_run: bool,
    pub plan: DeploymentPlan<Target>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs never started because the batch was cancelled
    pub skipped: usize,
    /// Succeeded over attempted jobs, 0.0 when nothing ran
    pub success_rate: f64,
    /// In input order
    pub jobs: Vec<JobOutcome>,
    pub wallets: Vec<WalletStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Cumulative counters across batches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub batches: u64,
    pub jobs_total: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub last_batch_id: Option<Uuid>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl EngineStats {
    pub fn success_rate(&self) -> f64 {
        let attempted = self.jobs_succeeded + self.jobs_failed;
        if attempted == 0 {
            0.0
        } else {
            self.jobs_succeeded as f64 / attempted as f64
        }
    }
}

/// Where the batch gets its signing wallets
#[derive(Clone)]
pub enum WalletSource {
    /// Raw secrets, in the order wallets should be used
    Secrets(Vec<Secret>),
    /// Up to `count` wallets decrypted from the engine's vault
    Vault { password: Secret, count: usize },
}

impl WalletSource {
    pub fn is_empty(&self) -> bool {
        match self {
            WalletSource::Secrets(secrets) => secrets.is_empty(),
            WalletSource::Vault { count, .. } => *count == 0,
        }
    }
}

impl fmt::Debug for WalletSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletSource::Secrets(secrets) => {
                write!(f, "Secrets([{} redacted])", secrets.len())
            }
            WalletSource::Vault { count, .. } => f
                .debug_struct("Vault")
                .field("password", &"<redacted>")
                .field("count", count)
                .finish(),
        }
    }
}

/// Scheduling knobs
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub max_concurrent_wallets: usize,
    /// Pause between consecutive jobs of one wallet
    pub inter_job_delay: Duration,
    /// Minimum spacing between any two submissions, zero to disable
    pub min_submit_interval: Duration,
    /// Wallets below this balance are flagged (warning only)
    pub min_balance_lamports: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_concurrent_wallets: 4,
            inter_job_delay: Duration::from_millis(500),
            min_submit_interval: Duration::ZERO,
            min_balance_lamports: 0,
        }
    }
}

/// Everything needed to run one batch
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub targets: Vec<Target>,
    pub wallets: WalletSource,
    pub max_per_wallet: usize,
    pub options: ExecutionOptions,
    pub cost: CostModel,
    pub dry_run: bool,
    pub cancel: CancellationToken,
}

impl BatchConfig {
    pub fn new(targets: Vec<Target>, wallets: WalletSource, max_per_wallet: usize) -> Self {
        Self {
            targets,
            wallets,
            max_per_wallet,
            options: ExecutionOptions::default(),
            cost: CostModel::default(),
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of validating and preparing a batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupReport {
    /// `None` when no wallet could be initialized
    pub plan: Option<DeploymentPlan<Target>>,
    pub ready: bool,
    pub wallet_stats: Vec<WalletStats>,
    /// Valid signing contexts initialized
    pub signers: usize,
    /// Secrets skipped because they did not parse or decrypt
    pub skipped_wallets: usize,
}
