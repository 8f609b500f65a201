//! Remote collaborators of the engine
//!
//! The engine only knows the [`Submitter`] and [`BalanceSource`] traits.
//! Concrete adapters:
//! - [`PumpPortalCreator`]: PumpPortal local API "create", signed locally with
//!   the funding wallet plus a fresh mint keypair, sent over Solana RPC
//! - [`RpcBalanceSource`]: SOL balance via Solana RPC

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

use crate::error::{Error, Result};
use crate::vault::{short_address, SigningContext};

use super::types::{DeploymentJob, TxReference};

/// PumpPortal Local Transaction API endpoint (build your own tx)
pub const PUMPPORTAL_LOCAL_API_URL: &str = "https://pumpportal.fun/api/trade-local";

/// Performs one creation attempt for a job
///
/// Called once per attempt; retries happen outside.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, signer: &SigningContext, job: &DeploymentJob) -> Result<TxReference>;
}

/// Looks up wallet balances in lamports
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, address: &str) -> Result<u64>;
}

/// PumpPortal creation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpPortalSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Priority fee in SOL
    #[serde(default = "default_priority_fee")]
    pub priority_fee_sol: f64,
    /// Dev buy made in the creation transaction, in SOL
    #[serde(default)]
    pub initial_buy_sol: f64,
    /// Slippage percentage (e.g., 10 for 10%)
    #[serde(default = "default_slippage")]
    pub slippage_pct: u32,
    #[serde(default = "default_pool")]
    pub pool: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_url() -> String {
    PUMPPORTAL_LOCAL_API_URL.to_string()
}

fn default_priority_fee() -> f64 {
    0.0005
}

fn default_slippage() -> u32 {
    10
}

fn default_pool() -> String {
    "pump".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

impl Default for PumpPortalSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            priority_fee_sol: default_priority_fee(),
            initial_buy_sol: 0.0,
            slippage_pct: default_slippage(),
            pool: default_pool(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct TokenMetadata {
    name: String,
    symbol: String,
    uri: String,
}

/// Local API create request (returns an unsigned transaction)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    public_key: String,
    action: &'static str,
    token_metadata: TokenMetadata,
    mint: String,
    denominated_in_sol: String,
    amount: f64,
    slippage: u32,
    priority_fee: f64,
    pool: String,
}

/// Creates pump.fun tokens through the PumpPortal local API
pub struct PumpPortalCreator {
    client: Client,
    rpc: Arc<RpcClient>,
    settings: PumpPortalSettings,
}

impl PumpPortalCreator {
    pub fn new(rpc: Arc<RpcClient>, settings: PumpPortalSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            rpc,
            settings,
        })
    }

    fn build_request(&self, signer: &SigningContext, job: &DeploymentJob, mint: &Pubkey) -> Result<CreateRequest> {
        let target = &job.target;
        let symbol = target
            .symbol
            .clone()
            .ok_or_else(|| Error::InvalidPayload(format!("target '{}' has no symbol", target.id)))?;
        let uri = target
            .metadata_uri
            .clone()
            .ok_or_else(|| Error::InvalidPayload(format!("target '{}' has no metadata URI", target.id)))?;

        Ok(CreateRequest {
            public_key: signer.address().to_string(),
            action: "create",
            token_metadata: TokenMetadata {
                name: target.name.clone(),
                symbol,
                uri,
            },
            mint: mint.to_string(),
            denominated_in_sol: "true".to_string(),
            amount: self.settings.initial_buy_sol,
            slippage: self.settings.slippage_pct,
            priority_fee: self.settings.priority_fee_sol,
            pool: self.settings.pool.clone(),
        })
    }
}

#[async_trait]
impl Submitter for PumpPortalCreator {
    async fn submit(&self, signer: &SigningContext, job: &DeploymentJob) -> Result<TxReference> {
        // Each attempt creates a new asset address
        let mint = Keypair::new();
        let request = self.build_request(signer, job, &mint.pubkey())?;

        debug!(
            "Requesting create transaction for '{}' from {}",
            job.target.name,
            short_address(signer.address())
        );

        let response = self
            .client
            .post(&self.settings.api_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), body));
        }

        let bytes = response.bytes().await?;
        let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|e| Error::Submission(format!("Malformed transaction from API: {}", e)))?;

        let signed = VersionedTransaction::try_new(unsigned.message, &[&mint, signer.keypair()])
            .map_err(|e| Error::Submission(format!("Signing failed: {}", e)))?;

        let signature = self.rpc.send_transaction(&signed).await?;

        Ok(TxReference {
            signature: signature.to_string(),
            asset: Some(mint.pubkey().to_string()),
        })
    }
}

/// Balance lookups against a Solana RPC node
pub struct RpcBalanceSource {
    rpc: Arc<RpcClient>,
}

impl RpcBalanceSource {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl BalanceSource for RpcBalanceSource {
    async fn balance(&self, address: &str) -> Result<u64> {
        let pubkey = Pubkey::from_str(address)
            .map_err(|_| Error::InvalidConfig(format!("invalid address {}", address)))?;
        Ok(self.rpc.get_balance(&pubkey).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Target;

    fn creator() -> PumpPortalCreator {
        let rpc = Arc::new(RpcClient::new("http://127.0.0.1:8899".to_string()));
        PumpPortalCreator::new(rpc, PumpPortalSettings::default()).unwrap()
    }

    #[test]
    fn test_create_request_serialization() {
        let signer = SigningContext::new(Keypair::new(), None);
        let mut target = Target::new("t1", "Alpha").with_symbol("ALP");
        target.metadata_uri = Some("https://example.com/alpha.json".into());
        let job = DeploymentJob::new(0, target, signer.address().to_string());
        let mint = Keypair::new().pubkey();

        let request = creator().build_request(&signer, &job, &mint).unwrap();
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"action\":\"create\""));
        assert!(json.contains("\"tokenMetadata\":{\"name\":\"Alpha\",\"symbol\":\"ALP\""));
        assert!(json.contains(&format!("\"publicKey\":\"{}\"", signer.address())));
        assert!(json.contains(&format!("\"mint\":\"{}\"", mint)));
        assert!(json.contains("\"denominatedInSol\":\"true\""));
    }

    #[test]
    fn test_missing_symbol_is_terminal() {
        let signer = SigningContext::new(Keypair::new(), None);
        let job = DeploymentJob::new(0, Target::new("t1", "Alpha"), signer.address().to_string());

        let err = creator()
            .build_request(&signer, &job, &Keypair::new().pubkey())
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PAYLOAD");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_settings_defaults() {
        let settings: PumpPortalSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.api_url, PUMPPORTAL_LOCAL_API_URL);
        assert_eq!(settings.pool, "pump");
        assert_eq!(settings.slippage_pct, 10);
    }
}
