//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::{Confirm, Password};
use solana_client::nonblocking::rpc_client::RpcClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::DeployerConfig;
use crate::engine::{
    BatchConfig, BatchEngine, BatchResult, JobState, ProgressEvent, PumpPortalCreator,
    RpcBalanceSource, SetupReport, Target, WalletSource,
};
use crate::identity::{HttpIdentityProvider, IdentityDirectory};
use crate::resilience::ResilientExecutor;
use crate::vault::{short_address, CredentialVault, Secret};

/// Environment variable read instead of prompting for the vault password
pub const VAULT_PASSWORD_ENV: &str = "DEPLOYER_VAULT_PASSWORD";

/// Where `deploy` takes its wallets from
#[derive(Debug, Clone)]
pub enum WalletArgs {
    /// File with one secret per line, or a JSON array of secrets
    SecretsFile(PathBuf),
    /// First `count` wallets of the vault, active first
    Vault { count: usize },
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &DeployerConfig) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn open_vault(config: &DeployerConfig) -> Result<CredentialVault> {
    CredentialVault::open(&config.vault.path())
        .with_context(|| format!("Failed to open vault at {}", config.vault.dir))
}

/// Vault password from the environment, or an interactive prompt
fn vault_password(confirm: bool) -> Result<Secret> {
    if let Ok(password) = std::env::var(VAULT_PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(Zeroizing::new(password));
        }
    }
    prompt_password("Vault password", confirm)
}

fn prompt_password(prompt: &str, confirm: bool) -> Result<Secret> {
    let mut input = Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Repeat password", "Passwords do not match");
    }
    Ok(Zeroizing::new(input.interact()?))
}

fn prompt_secret(prompt: &str) -> Result<Secret> {
    Ok(Zeroizing::new(Password::new().with_prompt(prompt).interact()?))
}

fn read_secret_file(path: &Path) -> Result<Secret> {
    let content = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secret file {}", path.display()))?,
    );
    Ok(Zeroizing::new(content.trim().to_string()))
}

fn confirm(prompt: String) -> Result<bool> {
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

/// Add a wallet to the vault
pub fn vault_add(
    config: &DeployerConfig,
    label: &str,
    secret_file: Option<PathBuf>,
    activate: bool,
) -> Result<()> {
    let mut vault = open_vault(config)?;
    let secret = match secret_file {
        Some(path) => read_secret_file(&path)?,
        None => prompt_secret("Wallet secret key")?,
    };
    let password = vault_password(vault.list_wallets().is_empty())?;

    let record = vault.add_wallet(&secret, label, &password, activate)?;
    println!("Added wallet {} ({})", record.address, record.name);
    if record.is_active {
        println!("Wallet is now active");
    }
    Ok(())
}

/// Add a wallet together with its recovery phrase
pub fn vault_add_phrase(
    config: &DeployerConfig,
    label: &str,
    derivation_index: u32,
    activate: bool,
) -> Result<()> {
    let mut vault = open_vault(config)?;
    let secret = prompt_secret("Wallet secret key")?;
    let phrase = prompt_secret("Recovery phrase")?;
    let password = vault_password(vault.list_wallets().is_empty())?;

    let record = vault.add_wallet_with_recovery_phrase(
        &secret,
        &phrase,
        derivation_index,
        label,
        &password,
        activate,
    )?;
    println!(
        "Added wallet {} ({}) with recovery phrase",
        record.address, record.name
    );
    Ok(())
}

/// List vault wallets
pub fn vault_list(config: &DeployerConfig) -> Result<()> {
    let vault = open_vault(config)?;

    println!("\n=== VAULT WALLETS ===\n");
    if vault.list_wallets().is_empty() {
        println!("No wallets. Add one with `deployer vault add`.");
        return Ok(());
    }

    println!("{:<3} {:<20} {:<46} {:<8} {}", "", "NAME", "ADDRESS", "PHRASE", "CREATED");
    println!("{}", "-".repeat(100));
    for wallet in vault.list_wallets() {
        println!(
            "{:<3} {:<20} {:<46} {:<8} {}",
            if wallet.is_active { "*" } else { "" },
            wallet.name,
            wallet.address,
            if wallet.has_recovery_phrase() { "yes" } else { "no" },
            wallet.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    Ok(())
}

/// Remove a wallet from the vault
pub fn vault_remove(config: &DeployerConfig, address: &str, force: bool) -> Result<()> {
    let mut vault = open_vault(config)?;
    let name = vault
        .get_wallet(address)
        .map(|w| w.name.clone())
        .ok_or_else(|| anyhow::anyhow!("Wallet not found: {}", address))?;

    if !force
        && !confirm(format!(
            "Remove wallet {} ({})? Export a backup first; this cannot be undone.",
            short_address(address),
            name
        ))?
    {
        info!("Remove cancelled by user");
        return Ok(());
    }

    vault.remove_wallet(address)?;
    println!("Removed wallet {}", address);
    if let Some(active) = vault.active_wallet() {
        println!("Active wallet: {} ({})", active.address, active.name);
    }
    Ok(())
}

/// Rename a vault wallet
pub fn vault_rename(config: &DeployerConfig, address: &str, name: &str) -> Result<()> {
    let mut vault = open_vault(config)?;
    vault.rename_wallet(address, name)?;
    println!("Renamed {} to {}", short_address(address), name);
    Ok(())
}

/// Make a wallet the active one
pub fn vault_activate(config: &DeployerConfig, address: &str) -> Result<()> {
    let mut vault = open_vault(config)?;
    let password = vault_password(false)?;
    vault.set_active(address, &password)?;
    println!("Active wallet: {}", address);
    Ok(())
}

/// Export an encrypted backup of a vault wallet
pub fn vault_export(config: &DeployerConfig, address: &str, with_phrase: bool) -> Result<()> {
    let vault = open_vault(config)?;
    let record = vault
        .get_wallet(address)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Wallet not found: {}", address))?;

    let password = vault_password(false)?;
    let secret = vault
        .decrypt_secret(address, &password)
        .ok_or_else(|| anyhow::anyhow!("Invalid password for wallet {}", short_address(address)))?;
    let phrase = if with_phrase {
        vault.decrypt_recovery_phrase(address, &password)
    } else {
        None
    };
    if with_phrase && phrase.is_none() {
        warn!("Wallet {} has no recovery phrase to export", short_address(address));
    }

    let backup_password = prompt_password("Backup password", true)?;
    let path = vault.export_backup(
        &secret,
        &backup_password,
        Some(&record.name),
        phrase.as_ref().map(|p| p.as_str()),
    )?;
    println!("Backup written to {}", path.display());
    Ok(())
}

/// Import a backup file into the vault
pub fn vault_import(config: &DeployerConfig, path: &Path, activate: bool) -> Result<()> {
    let mut vault = open_vault(config)?;
    let backup_password = prompt_password("Backup password", false)?;
    let imported = vault.import_backup(path, &backup_password)?;

    let password = vault_password(vault.list_wallets().is_empty())?;
    let label = imported.name.clone().unwrap_or_default();
    let record = match &imported.phrase {
        Some(phrase) => {
            vault.add_wallet_with_recovery_phrase(&imported.secret, phrase, 0, &label, &password, activate)?
        }
        None => vault.add_wallet(&imported.secret, &label, &password, activate)?,
    };
    println!("Imported wallet {} ({})", record.address, record.name);
    Ok(())
}

/// List backup files
pub fn vault_backups(config: &DeployerConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let backups = vault.list_backups()?;

    println!("\n=== BACKUPS ({}) ===\n", vault.backup_dir().display());
    if backups.is_empty() {
        println!("No backups.");
    }
    for path in backups {
        println!("{}", path.display());
    }
    println!();
    Ok(())
}

/// Load targets from a JSON array file
pub fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read targets file {}", path.display()))?;
    let targets: Vec<Target> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid targets file {}", path.display()))?;
    Ok(targets)
}

/// Load secrets from a JSON array or a newline separated file
pub fn load_secrets(path: &Path) -> Result<Vec<Secret>> {
    let content = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets file {}", path.display()))?,
    );
    let trimmed = content.trim();

    // A single solana-keygen file is also a JSON array, of numbers
    if trimmed.starts_with("[\"") || trimmed == "[]" {
        let list: Vec<String> = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid secrets file {}", path.display()))?;
        return Ok(list.into_iter().map(Zeroizing::new).collect());
    }

    Ok(trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| Zeroizing::new(l.to_string()))
        .collect())
}

fn build_engine(config: &DeployerConfig, wallets: &WalletArgs) -> Result<BatchEngine> {
    let rpc = Arc::new(RpcClient::new_with_timeout(
        config.rpc.endpoint.clone(),
        config.rpc.timeout(),
    ));
    let executor = Arc::new(ResilientExecutor::new(
        config.retry_policy(),
        config.breaker.clone(),
    ));
    let creator = PumpPortalCreator::new(rpc.clone(), config.pumpportal.clone())?;

    let mut engine = BatchEngine::new(Arc::new(creator), executor)
        .with_balance_source(Arc::new(RpcBalanceSource::new(rpc)));

    if let WalletArgs::Vault { .. } = wallets {
        engine = engine.with_vault(Arc::new(open_vault(config)?));
    }

    if !config.identity.providers.is_empty() {
        let mut directory = IdentityDirectory::new(config.identity.retry.clone());
        for settings in &config.identity.providers {
            directory = directory.with_provider(Arc::new(HttpIdentityProvider::new(settings)?));
        }
        engine = engine.with_identity(Arc::new(directory));
    }

    Ok(engine)
}

fn batch_config(
    config: &DeployerConfig,
    targets_path: &Path,
    wallets: &WalletArgs,
    max_per_wallet: Option<usize>,
) -> Result<BatchConfig> {
    let targets = load_targets(targets_path)?;
    let source = match wallets {
        WalletArgs::SecretsFile(path) => WalletSource::Secrets(load_secrets(path)?),
        WalletArgs::Vault { count } => WalletSource::Vault {
            password: vault_password(false)?,
            count: *count,
        },
    };

    let mut batch = BatchConfig::new(
        targets,
        source,
        max_per_wallet.unwrap_or(config.execution.max_per_wallet),
    );
    batch.options = config.execution.options();
    batch.cost = config.cost.clone();
    Ok(batch)
}

fn print_setup(report: &SetupReport) {
    println!("\n=== DEPLOYMENT PLAN ===\n");
    println!(
        "Wallets: {} ready, {} skipped",
        report.signers, report.skipped_wallets
    );

    let Some(plan) = &report.plan else {
        println!("No usable wallets - nothing to deploy.");
        return;
    };

    println!("Jobs: {}", plan.total_jobs);
    println!("Tokens per wallet: {}", plan.tokens_per_wallet);
    println!(
        "Estimated cost: {:.6} SOL ({} lamports)",
        plan.estimated_cost_sol(),
        plan.estimated_cost_lamports
    );
    println!("Estimated duration: {:.0}s\n", plan.estimated_duration_secs);

    for assignment in &plan.assignments {
        let stats = report
            .wallet_stats
            .iter()
            .find(|w| w.address == assignment.wallet);
        let balance = stats
            .and_then(|w| w.balance_lamports)
            .map(|l| format!("{:.4} SOL", l as f64 / 1_000_000_000.0))
            .unwrap_or_else(|| "unknown".to_string());
        let low = if stats.map(|w| w.low_balance).unwrap_or(false) {
            " (LOW)"
        } else {
            ""
        };

        println!(
            "{} [{}{}]",
            short_address(&assignment.wallet),
            balance,
            low
        );
        for target in &assignment.targets {
            println!(
                "    {} {}",
                target.name,
                target.symbol.as_deref().map(|s| format!("({})", s)).unwrap_or_default()
            );
        }
    }
    println!();
}

/// Preview the plan without submitting anything
pub async fn deploy_plan(
    config: &DeployerConfig,
    targets_path: &Path,
    wallets: WalletArgs,
    max_per_wallet: Option<usize>,
) -> Result<()> {
    let engine = build_engine(config, &wallets)?;
    let batch = batch_config(config, targets_path, &wallets, max_per_wallet)?;
    let report = engine.setup(&batch).await?;
    print_setup(&report);
    Ok(())
}

fn print_progress(event: &ProgressEvent) {
    let detail = match event.outcome.state {
        JobState::Succeeded => event
            .outcome
            .tx
            .as_ref()
            .map(|tx| format!("ok {}", tx.signature))
            .unwrap_or_else(|| "ok".to_string()),
        _ => event
            .outcome
            .error
            .as_ref()
            .map(|e| format!("FAILED [{}] {}", e.code, e.message))
            .unwrap_or_else(|| "FAILED".to_string()),
    };
    println!(
        "[{}/{}] {} via {}: {}",
        event.completed,
        event.total,
        event.target_name,
        short_address(&event.wallet),
        detail
    );
}

fn print_summary(result: &BatchResult) {
    println!("\n=== BATCH {} ===\n", result.batch_id);
    if result.dry_run {
        println!("DRY RUN - nothing was submitted");
    }
    if result.cancelled {
        println!("Cancelled before completion");
    }
    println!("Total: {}", result.total);
    println!("Succeeded: {}", result.succeeded);
    println!("Failed: {}", result.failed);
    println!("Skipped: {}", result.skipped);
    println!("Success rate: {:.1}%", result.success_rate * 100.0);
    println!("Duration: {}ms\n", result.duration_ms());

    println!("{:<14} {:>8} {:>9} {:>9} {:>7}", "WALLET", "ASSIGNED", "SUCCEEDED", "FAILED", "LOW");
    for wallet in &result.wallets {
        println!(
            "{:<14} {:>8} {:>9} {:>9} {:>7}",
            short_address(&wallet.address),
            wallet.assigned,
            wallet.succeeded,
            wallet.failed,
            if wallet.low_balance { "yes" } else { "" }
        );
    }
    println!();
}

/// Run a batch
pub async fn deploy_run(
    config: &DeployerConfig,
    targets_path: &Path,
    wallets: WalletArgs,
    max_per_wallet: Option<usize>,
    dry_run: bool,
    force: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let engine = build_engine(config, &wallets)?;
    let mut batch = batch_config(config, targets_path, &wallets, max_per_wallet)?;
    batch.dry_run = dry_run;

    if dry_run {
        warn!("Running in DRY-RUN mode - nothing will be submitted");
    } else {
        let report = engine.setup(&batch).await?;
        print_setup(&report);
        if !report.ready {
            anyhow::bail!("No usable wallets");
        }
        if report.wallet_stats.iter().any(|w| w.low_balance) {
            warn!("Some wallets are below the minimum balance");
        }
        if !force && !confirm("Deploy these tokens? Transactions cannot be undone.".to_string())? {
            info!("Deployment cancelled by user");
            return Ok(());
        }
    }

    let cancel: CancellationToken = batch.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received - finishing in-flight jobs, not starting new ones");
            cancel.cancel();
        }
    });

    let result = engine.execute(&batch, |event| print_progress(&event)).await?;
    print_summary(&result);

    let resilience = engine.executor().stats();
    info!(
        "Remote calls: {} total, {} retries, {} rejected by open circuits",
        resilience.total_calls, resilience.retries, resilience.rejected_by_breaker
    );

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write result to {}", path.display()))?;
        println!("Result written to {}", path.display());
    }

    if result.failed > 0 && result.succeeded == 0 && !result.dry_run {
        anyhow::bail!("All {} jobs failed", result.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_secrets_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# funding wallets\nkeyA\n\n  keyB  ").unwrap();

        let secrets = load_secrets(file.path()).unwrap();
        let plain: Vec<&str> = secrets.iter().map(|s| s.as_str()).collect();
        assert_eq!(plain, vec!["keyA", "keyB"]);
    }

    #[test]
    fn test_load_secrets_json_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["keyA", "keyB"]"#).unwrap();
        assert_eq!(load_secrets(file.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_load_targets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"1","name":"Alpha","symbol":"ALP","metadataUri":"https://x/a.json"}},
               {{"id":"2","name":"Beta","handle":"@beta"}}]"#
        )
        .unwrap();

        let targets = load_targets(file.path()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].metadata_uri.as_deref(), Some("https://x/a.json"));
        assert_eq!(targets[1].handle.as_deref(), Some("@beta"));
    }
}
