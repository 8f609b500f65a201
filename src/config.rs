//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{ExecutionOptions, PumpPortalSettings};
use crate::identity::{HttpProviderSettings, IdentityRetry};
use crate::planner::CostModel;
use crate::resilience::{BreakerSettings, RetryPolicy, RetrySettings};

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfig {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub cost: CostModel,
    #[serde(default)]
    pub pumpportal: PumpPortalSettings,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding vault.json and backups/
    #[serde(default = "default_vault_dir")]
    pub dir: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            dir: default_vault_dir(),
        }
    }
}

impl VaultConfig {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_max_per_wallet")]
    pub max_per_wallet: usize,
    #[serde(default = "default_max_concurrent_wallets")]
    pub max_concurrent_wallets: usize,
    #[serde(default = "default_inter_job_delay_ms")]
    pub inter_job_delay_ms: u64,
    /// Minimum spacing between any two submissions (0 = off)
    #[serde(default)]
    pub min_submit_interval_ms: u64,
    /// Warn when a wallet holds less than this
    #[serde(default = "default_min_balance_sol")]
    pub min_balance_sol: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_per_wallet: default_max_per_wallet(),
            max_concurrent_wallets: default_max_concurrent_wallets(),
            inter_job_delay_ms: default_inter_job_delay_ms(),
            min_submit_interval_ms: 0,
            min_balance_sol: default_min_balance_sol(),
        }
    }
}

impl ExecutionConfig {
    pub fn options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_concurrent_wallets: self.max_concurrent_wallets,
            inter_job_delay: Duration::from_millis(self.inter_job_delay_ms),
            min_submit_interval: Duration::from_millis(self.min_submit_interval_ms),
            min_balance_lamports: (self.min_balance_sol * LAMPORTS_PER_SOL) as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Providers in priority order
    #[serde(default)]
    pub providers: Vec<HttpProviderSettings>,
    #[serde(default)]
    pub retry: IdentityRetry,
}

fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_vault_dir() -> String {
    "vault".to_string()
}

fn default_max_per_wallet() -> usize {
    5
}

fn default_max_concurrent_wallets() -> usize {
    4
}

fn default_inter_job_delay_ms() -> u64 {
    2_000
}

fn default_min_balance_sol() -> f64 {
    0.05
}

impl DeployerConfig {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("vault.dir", default_vault_dir())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix DEPLOYER__)
            .add_source(
                config::Environment::with_prefix("DEPLOYER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: DeployerConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.rpc.endpoint.starts_with("http://") && !self.rpc.endpoint.starts_with("https://") {
            anyhow::bail!("rpc.endpoint must be an http(s) URL");
        }

        if self.vault.dir.trim().is_empty() {
            anyhow::bail!("vault.dir must not be empty");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            anyhow::bail!("retry.jitter must be between 0.0 and 1.0");
        }
        if self.retry.multiplier < 1.0 {
            anyhow::bail!("retry.multiplier must be at least 1.0");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            anyhow::bail!("retry.max_delay_ms must not be below retry.base_delay_ms");
        }

        if self.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be at least 1");
        }

        if self.execution.max_per_wallet == 0 {
            anyhow::bail!("execution.max_per_wallet must be at least 1");
        }
        if self.execution.max_concurrent_wallets == 0 {
            anyhow::bail!("execution.max_concurrent_wallets must be at least 1");
        }
        if self.execution.min_balance_sol < 0.0 {
            anyhow::bail!("execution.min_balance_sol must not be negative");
        }

        if self.cost.per_operation_secs < 0.0 {
            anyhow::bail!("cost.per_operation_secs must not be negative");
        }

        if self.pumpportal.slippage_pct > 100 {
            anyhow::bail!("pumpportal.slippage_pct cannot exceed 100");
        }
        if self.pumpportal.priority_fee_sol < 0.0 || self.pumpportal.initial_buy_sol < 0.0 {
            anyhow::bail!("pumpportal fees and amounts must not be negative");
        }
        url::Url::parse(&self.pumpportal.api_url)
            .with_context(|| format!("Invalid pumpportal.api_url: {}", self.pumpportal.api_url))?;

        for provider in &self.identity.providers {
            if !provider.url_template.contains("{handle}") {
                anyhow::bail!(
                    "identity provider '{}' url_template must contain {{handle}}",
                    provider.name
                );
            }
        }

        if self.execution.inter_job_delay_ms == 0 && self.execution.min_submit_interval_ms == 0 {
            tracing::warn!("No pacing configured - submissions may hit remote rate limits");
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let providers: Vec<String> = self
            .identity
            .providers
            .iter()
            .map(|p| {
                format!(
                    "{} ({}{})",
                    p.name,
                    mask_url(&p.url_template),
                    if p.api_key_env.is_some() { ", key: ***" } else { "" }
                )
            })
            .collect();

        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Vault:
    dir: {}
  Retry:
    max_attempts: {}
    delay: {}ms - {}ms (x{}, jitter {})
  Breaker:
    failure_threshold: {}
    cooldown: {}ms
  Execution:
    max_per_wallet: {}
    max_concurrent_wallets: {}
    inter_job_delay: {}ms
    min_submit_interval: {}ms
    min_balance: {} SOL
  Cost:
    fixed_fee: {} lamports
    gas: {} x {}
    per_operation: {}s
  PumpPortal:
    api_url: {}
    priority_fee: {} SOL
    initial_buy: {} SOL
    slippage: {}%
    pool: {}
  Identity:
    providers: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.vault.dir,
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
            self.retry.multiplier,
            self.retry.jitter,
            self.breaker.failure_threshold,
            self.breaker.cooldown_ms,
            self.execution.max_per_wallet,
            self.execution.max_concurrent_wallets,
            self.execution.inter_job_delay_ms,
            self.execution.min_submit_interval_ms,
            self.execution.min_balance_sol,
            self.cost.fixed_fee_lamports,
            self.cost.gas_price,
            self.cost.gas_per_operation,
            self.cost.per_operation_secs,
            mask_url(&self.pumpportal.api_url),
            self.pumpportal.priority_fee_sol,
            self.pumpportal.initial_buy_sol,
            self.pumpportal.slippage_pct,
            self.pumpportal.pool,
            if providers.is_empty() {
                "(none)".to_string()
            } else {
                providers.join(", ")
            },
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DeployerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.max_per_wallet, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.execution.options().min_balance_lamports, 50_000_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[rpc]
endpoint = "https://rpc.example.com/?api-key=secret"

[execution]
max_per_wallet = 3
min_submit_interval_ms = 250

[breaker]
failure_threshold = 2

[[identity.providers]]
name = "primary"
url_template = "https://id.example.com/{{handle}}"
"#
        )
        .unwrap();

        let config = DeployerConfig::load(file.path()).unwrap();
        assert_eq!(config.execution.max_per_wallet, 3);
        assert_eq!(config.execution.max_concurrent_wallets, 4);
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.cooldown_ms, 30_000);
        assert_eq!(config.identity.providers.len(), 1);
        assert_eq!(
            config.execution.options().min_submit_interval,
            Duration::from_millis(250)
        );

        let shown = config.masked_display();
        assert!(shown.contains("https://rpc.example.com/?***"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeployerConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.vault.dir, "vault");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DeployerConfig::default();
        config.execution.max_per_wallet = 0;
        assert!(config.validate().is_err());

        let mut config = DeployerConfig::default();
        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());

        let mut config = DeployerConfig::default();
        config.identity.providers.push(HttpProviderSettings {
            name: "broken".into(),
            url_template: "https://id.example.com/".into(),
            api_key_env: None,
            timeout_ms: 1_000,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(mask_url("https://a.example/?key=1"), "https://a.example/?***");
        assert_eq!(mask_url("https://a.example/"), "https://a.example/");
    }
}
