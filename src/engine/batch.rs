//! Batch execution engine
//!
//! # Scheduling
//! ```text
//! BatchConfig ──> setup (validate, signers, plan, balances)
//!                   │
//!                   ▼
//!        one task per wallet bucket (Semaphore: max_concurrent_wallets)
//!                   │  jobs strictly sequential per wallet
//!                   ▼
//!        ResilientExecutor("submit") ──> Submitter
//!                   │
//!                   ▼
//!        async-channel ──> progress dispatcher ──> on_progress
//! ```
//!
//! Job failures never abort the batch. Cancellation stops new jobs from
//! starting; unstarted jobs stay pending and are reported as skipped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::IdentityDirectory;
use crate::planner::{self, DeploymentPlan};
use crate::resilience::{RateLimiter, ResilientExecutor, DEP_RPC, DEP_SUBMIT};
use crate::vault::{short_address, CredentialVault, SigningContext};

use super::submitter::{BalanceSource, Submitter};
use super::types::{
    BatchConfig, BatchResult, DeploymentJob, EngineStats, JobFailure, JobOutcome, JobState,
    ProgressEvent, SetupReport, Target, WalletSource, WalletStats,
};

/// Validated batch, ready to run
struct Prepared {
    report: SetupReport,
    signers: Vec<SigningContext>,
}

/// State shared by all wallet workers of one batch
struct WorkerContext {
    submitter: Arc<dyn Submitter>,
    executor: Arc<ResilientExecutor>,
    limiter: Option<RateLimiter>,
    jobs: DashMap<usize, DeploymentJob>,
    inter_job_delay: std::time::Duration,
    cancel: CancellationToken,
}

/// Finished job on its way to the progress dispatcher
struct Completion {
    wallet: String,
    outcome: JobOutcome,
}

/// Runs deployment batches across many wallets
pub struct BatchEngine {
    submitter: Arc<dyn Submitter>,
    executor: Arc<ResilientExecutor>,
    balances: Option<Arc<dyn BalanceSource>>,
    vault: Option<Arc<CredentialVault>>,
    identity: Option<Arc<IdentityDirectory>>,
    stats: RwLock<EngineStats>,
}

impl BatchEngine {
    pub fn new(submitter: Arc<dyn Submitter>, executor: Arc<ResilientExecutor>) -> Self {
        Self {
            submitter,
            executor,
            balances: None,
            vault: None,
            identity: None,
            stats: RwLock::new(EngineStats::default()),
        }
    }

    pub fn with_balance_source(mut self, balances: Arc<dyn BalanceSource>) -> Self {
        self.balances = Some(balances);
        self
    }

    /// Vault used by `WalletSource::Vault`
    pub fn with_vault(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_identity(mut self, identity: Arc<IdentityDirectory>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor> {
        &self.executor
    }

    /// Validate the config, initialize signers, plan and check balances
    pub async fn setup(&self, config: &BatchConfig) -> Result<SetupReport> {
        Ok(self.prepare(config).await?.report)
    }

    async fn prepare(&self, config: &BatchConfig) -> Result<Prepared> {
        if config.targets.is_empty() {
            return Err(Error::NoTargets);
        }
        if config.wallets.is_empty() {
            return Err(Error::NoWallets);
        }
        if config.max_per_wallet == 0 {
            return Err(Error::InvalidConfig("max_per_wallet must be at least 1".to_string()));
        }
        if config.options.max_concurrent_wallets == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_wallets must be at least 1".to_string(),
            ));
        }

        let (signers, skipped_wallets) = self.resolve_signers(&config.wallets).await?;

        if signers.is_empty() {
            warn!("No valid wallets after initialization ({} skipped)", skipped_wallets);
            return Ok(Prepared {
                report: SetupReport {
                    plan: None,
                    ready: false,
                    wallet_stats: Vec::new(),
                    signers: 0,
                    skipped_wallets,
                },
                signers,
            });
        }

        let targets = match &self.identity {
            Some(identity) => identity.resolve_targets(config.targets.clone()).await,
            None => config.targets.clone(),
        };

        let addresses: Vec<String> = signers.iter().map(|s| s.address().to_string()).collect();
        let plan = planner::plan(&targets, &addresses, config.max_per_wallet, &config.cost)?;

        let mut wallet_stats: Vec<WalletStats> = signers
            .iter()
            .map(|s| WalletStats {
                address: s.address().to_string(),
                label: s.label().map(|l| l.to_string()),
                assigned: plan.targets_for(s.address()).map(|t| t.len()).unwrap_or(0),
                ..Default::default()
            })
            .collect();

        self.check_balances(&mut wallet_stats, config.options.min_balance_lamports)
            .await;

        info!(
            "Planned {} jobs over {} of {} wallets (~{:.4} SOL, ~{:.0}s)",
            plan.total_jobs,
            plan.wallets.len(),
            signers.len(),
            plan.estimated_cost_sol(),
            plan.estimated_duration_secs
        );

        Ok(Prepared {
            report: SetupReport {
                plan: Some(plan),
                ready: true,
                wallet_stats,
                signers: signers.len(),
                skipped_wallets,
            },
            signers,
        })
    }

    /// Signing contexts for the wallet source, plus how many were skipped
    async fn resolve_signers(&self, source: &WalletSource) -> Result<(Vec<SigningContext>, usize)> {
        let (candidates, skipped) = match source {
            WalletSource::Secrets(secrets) => {
                let mut signers = Vec::with_capacity(secrets.len());
                let mut skipped = 0;
                for (i, secret) in secrets.iter().enumerate() {
                    match SigningContext::from_secret(secret, None) {
                        Ok(signer) => signers.push(signer),
                        Err(e) => {
                            warn!("Skipping wallet #{}: {}", i + 1, e);
                            skipped += 1;
                        }
                    }
                }
                (signers, skipped)
            }
            WalletSource::Vault { password, count } => {
                let vault = self.vault.clone().ok_or_else(|| {
                    Error::InvalidConfig("vault wallet source requires a vault".to_string())
                })?;
                let password = password.clone();
                let count = *count;
                let available = vault.list_wallets().len().min(count);

                // Key derivation is CPU bound
                let signers = tokio::task::spawn_blocking(move || vault.resolve_signers(&password, count))
                    .await
                    .map_err(|e| Error::Internal(format!("signer resolution aborted: {}", e)))??;
                let skipped = available.saturating_sub(signers.len());
                (signers, skipped)
            }
        };

        // The same secret twice would plan one wallet twice
        let mut seen = HashSet::new();
        let mut signers = Vec::with_capacity(candidates.len());
        let mut duplicates = 0;
        for signer in candidates {
            if seen.insert(signer.address().to_string()) {
                signers.push(signer);
            } else {
                warn!("Skipping duplicate wallet {}", short_address(signer.address()));
                duplicates += 1;
            }
        }

        Ok((signers, skipped + duplicates))
    }

    async fn check_balances(&self, stats: &mut [WalletStats], min_balance: u64) {
        let Some(source) = &self.balances else {
            return;
        };

        for wallet in stats.iter_mut() {
            let address = wallet.address.clone();
            let result = self
                .executor
                .execute_with_retry(DEP_RPC, "balance lookup", || source.balance(&address))
                .await;
            match result {
                Ok(lamports) => {
                    wallet.balance_lamports = Some(lamports);
                    if lamports < min_balance {
                        wallet.low_balance = true;
                        warn!(
                            "Wallet {} balance {} lamports below minimum {}",
                            short_address(&address),
                            lamports,
                            min_balance
                        );
                    }
                }
                Err(e) => warn!(
                    "Balance lookup failed for {}: {}",
                    short_address(&address),
                    e
                ),
            }
        }
    }

    /// Run a batch
    ///
    /// `on_progress` is called once per finished job, in completion order,
    /// from a single task.
    pub async fn execute<F>(&self, config: &BatchConfig, mut on_progress: F) -> Result<BatchResult>
    where
        F: FnMut(ProgressEvent),
    {
        let started_at = Utc::now();
        let batch_id = Uuid::new_v4();

        let prepared = self.prepare(config).await?;
        let Some(plan) = prepared.report.plan.clone() else {
            return Err(Error::NoWallets);
        };

        let jobs = realize_jobs(&plan);

        if config.dry_run {
            info!("Dry run {}: {} jobs planned, nothing submitted", batch_id, jobs.len());
            return Ok(summarize(
                batch_id,
                true,
                plan,
                jobs,
                prepared.report.wallet_stats,
                started_at,
                false,
            ));
        }

        info!(
            "Starting batch {}: {} jobs across {} wallets (max {} concurrent)",
            batch_id,
            plan.total_jobs,
            plan.wallets.len(),
            config.options.max_concurrent_wallets
        );

        let ctx = Arc::new(WorkerContext {
            submitter: self.submitter.clone(),
            executor: self.executor.clone(),
            limiter: (!config.options.min_submit_interval.is_zero())
                .then(|| RateLimiter::new(config.options.min_submit_interval)),
            jobs: jobs.into_iter().map(|j| (j.index, j)).collect(),
            inter_job_delay: config.options.inter_job_delay,
            cancel: config.cancel.clone(),
        });

        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for entry in ctx.jobs.iter() {
            buckets
                .entry(entry.wallet.clone())
                .or_default()
                .push(entry.index);
        }
        for indices in buckets.values_mut() {
            indices.sort_unstable();
        }

        let (tx, rx) = async_channel::unbounded::<Completion>();
        let total = plan.total_jobs;

        let workers = run_workers(
            ctx.clone(),
            &plan,
            prepared.signers,
            buckets,
            config.options.max_concurrent_wallets,
            tx,
        );
        let dispatcher = dispatch_progress(rx, total, &mut on_progress);
        tokio::join!(workers, dispatcher);

        let mut jobs: Vec<DeploymentJob> = ctx.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.index);

        let result = summarize(
            batch_id,
            false,
            plan,
            jobs,
            prepared.report.wallet_stats,
            started_at,
            config.cancel.is_cancelled(),
        );

        info!(
            "Batch {} finished: {} succeeded, {} failed, {} skipped ({:.1}% success) in {}ms",
            batch_id,
            result.succeeded,
            result.failed,
            result.skipped,
            result.success_rate * 100.0,
            result.duration_ms()
        );

        self.record(&result).await;
        Ok(result)
    }

    async fn record(&self, result: &BatchResult) {
        let mut stats = self.stats.write().await;
        stats.batches += 1;
        stats.jobs_total += result.total as u64;
        stats.jobs_succeeded += result.succeeded as u64;
        stats.jobs_failed += result.failed as u64;
        stats.jobs_skipped += result.skipped as u64;
        stats.last_batch_id = Some(result.batch_id);
        stats.last_finished_at = Some(result.finished_at);
    }

    /// Cumulative statistics across batches
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Clear cumulative statistics
    pub async fn reset(&self) {
        *self.stats.write().await = EngineStats::default();
    }
}

/// Jobs in input order; buckets are contiguous, so the running offset is the index
fn realize_jobs(plan: &DeploymentPlan<Target>) -> Vec<DeploymentJob> {
    let mut jobs = Vec::with_capacity(plan.total_jobs);
    for assignment in &plan.assignments {
        for target in &assignment.targets {
            jobs.push(DeploymentJob::new(
                jobs.len(),
                target.clone(),
                assignment.wallet.clone(),
            ));
        }
    }
    jobs
}

async fn run_workers(
    ctx: Arc<WorkerContext>,
    plan: &DeploymentPlan<Target>,
    signers: Vec<SigningContext>,
    mut buckets: HashMap<String, Vec<usize>>,
    max_concurrent: usize,
    tx: Sender<Completion>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut by_address: HashMap<String, SigningContext> = signers
        .into_iter()
        .map(|s| (s.address().to_string(), s))
        .collect();

    let mut set = JoinSet::new();
    for wallet in &plan.wallets {
        let (Some(signer), Some(indices)) = (by_address.remove(wallet), buckets.remove(wallet)) else {
            continue;
        };
        set.spawn(run_wallet(
            ctx.clone(),
            signer,
            indices,
            semaphore.clone(),
            tx.clone(),
        ));
    }

    let mut finished = HashSet::new();
    let mut aborted = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(wallet) => {
                finished.insert(wallet);
            }
            Err(e) => {
                error!("Wallet worker aborted: {}", e);
                aborted.push(e.to_string());
            }
        }
    }

    if aborted.is_empty() {
        return;
    }

    // Jobs of a worker that did not return are failed, never left pending
    let reason = aborted.join("; ");
    let mut orphaned: Vec<usize> = ctx
        .jobs
        .iter()
        .filter(|e| !e.state.is_terminal() && !finished.contains(&e.wallet))
        .map(|e| e.index)
        .collect();
    orphaned.sort_unstable();

    for index in orphaned {
        let completion = {
            let Some(mut job) = ctx.jobs.get_mut(&index) else {
                continue;
            };
            let attempts = job.attempts;
            job.fail(JobFailure::worker_aborted(reason.clone()), attempts);
            Completion {
                wallet: job.wallet.clone(),
                outcome: job.outcome(),
            }
        };
        let _ = tx.send(completion).await;
    }
}

async fn run_wallet(
    ctx: Arc<WorkerContext>,
    signer: SigningContext,
    indices: Vec<usize>,
    semaphore: Arc<Semaphore>,
    tx: Sender<Completion>,
) -> String {
    let wallet = signer.address().to_string();

    let _permit = tokio::select! {
        _ = ctx.cancel.cancelled() => return wallet,
        permit = semaphore.acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => return wallet,
        },
    };

    debug!("Worker for {} starting {} jobs", short_address(&wallet), indices.len());

    for (position, index) in indices.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            break;
        }

        if position > 0 && !ctx.inter_job_delay.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(ctx.inter_job_delay) => {}
            }
        }

        if let Some(limiter) = &ctx.limiter {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = limiter.acquire() => {}
            }
        }

        let job = {
            let Some(mut entry) = ctx.jobs.get_mut(&index) else {
                continue;
            };
            entry.start();
            entry.clone()
        };

        let attempted = ctx
            .executor
            .execute_tracked_until(DEP_SUBMIT, "submit", &ctx.cancel, || {
                ctx.submitter.submit(&signer, &job)
            })
            .await;

        let completion = {
            let Some(mut entry) = ctx.jobs.get_mut(&index) else {
                continue;
            };
            match attempted.result {
                Ok(tx_ref) => {
                    info!(
                        "Deployed '{}' from {} (attempts: {}, sig: {})",
                        entry.target.name,
                        short_address(&wallet),
                        attempted.attempts,
                        tx_ref.signature
                    );
                    entry.succeed(tx_ref, attempted.attempts);
                }
                Err(e) => {
                    warn!(
                        "Job '{}' on {} failed [{}]: {}",
                        entry.target.name,
                        short_address(&wallet),
                        e.code(),
                        e
                    );
                    entry.fail(JobFailure::from(&e), attempted.attempts);
                }
            }
            Completion {
                wallet: wallet.clone(),
                outcome: entry.outcome(),
            }
        };

        // Receiver only goes away with the whole batch
        let _ = tx.send(completion).await;
    }

    wallet
}

async fn dispatch_progress<F>(rx: Receiver<Completion>, total: usize, on_progress: &mut F)
where
    F: FnMut(ProgressEvent),
{
    let mut completed = 0;
    while let Ok(completion) = rx.recv().await {
        completed += 1;
        on_progress(ProgressEvent {
            completed,
            total,
            wallet: completion.wallet,
            target_name: completion.outcome.target_name.clone(),
            outcome: completion.outcome,
        });
    }
}

fn summarize(
    batch_id: Uuid,
    dry_run: bool,
    plan: DeploymentPlan<Target>,
    jobs: Vec<DeploymentJob>,
    mut wallets: Vec<WalletStats>,
    started_at: chrono::DateTime<Utc>,
    cancelled: bool,
) -> BatchResult {
    let count = |state: JobState| jobs.iter().filter(|j| j.state == state).count();
    let succeeded = count(JobState::Succeeded);
    let failed = count(JobState::Failed);
    let skipped = if dry_run { 0 } else { count(JobState::Pending) };

    for stats in wallets.iter_mut() {
        let own = jobs.iter().filter(|j| j.wallet == stats.address);
        for job in own {
            match job.state {
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed => stats.failed += 1,
                _ => {}
            }
            if job.started_at.is_some() {
                stats.attempted += 1;
            }
        }
    }

    let attempted = succeeded + failed;
    BatchResult {
        batch_id,
        dry_run,
        total: jobs.len(),
        succeeded,
        failed,
        skipped,
        success_rate: if attempted == 0 {
            0.0
        } else {
            succeeded as f64 / attempted as f64
        },
        jobs: jobs.iter().map(|j| j.outcome()).collect(),
        wallets,
        plan,
        started_at,
        finished_at: Utc::now(),
        cancelled,
    }
}
