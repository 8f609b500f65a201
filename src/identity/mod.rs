//! Identity directory
//!
//! Resolves social handles on targets into recipient addresses. Providers
//! are tried in priority order, each with its own exponential backoff, until
//! one returns at least one valid address.

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::engine::Target;
use crate::error::{Error, Result};

/// Handles resolved concurrently by `resolve_targets`
const LOOKUP_CONCURRENCY: usize = 4;

/// A source of handle → address mappings
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Addresses registered for `handle` (without the leading '@')
    async fn lookup(&self, handle: &str) -> Result<Vec<String>>;
}

/// Retry budget applied to each provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRetry {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    250
}

fn default_max_interval_ms() -> u64 {
    2_000
}

fn default_max_elapsed_ms() -> u64 {
    10_000
}

impl Default for IdentityRetry {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

lazy_static::lazy_static! {
    /// Optional '@' followed by 1-32 word characters
    static ref HANDLE_PATTERN: Regex =
        Regex::new(r"^@?([A-Za-z0-9_]{1,32})$").expect("Invalid handle pattern");
}

/// Strip a leading '@' and check the handle shape
pub fn normalize_handle(handle: &str) -> Result<String> {
    HANDLE_PATTERN
        .captures(handle.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .ok_or_else(|| Error::InvalidPayload(format!("invalid handle '{}'", handle)))
}

/// Ordered fallback chain of identity providers
pub struct IdentityDirectory {
    providers: Vec<Arc<dyn IdentityProvider>>,
    retry: IdentityRetry,
    cache: DashMap<String, Vec<String>>,
}

impl IdentityDirectory {
    pub fn new(retry: IdentityRetry) -> Self {
        Self {
            providers: Vec::new(),
            retry,
            cache: DashMap::new(),
        }
    }

    /// Append a provider; earlier providers take priority
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Resolve a handle to its addresses
    ///
    /// Returns an empty list when every provider answered without a match,
    /// and the last error when no provider answered at all.
    pub async fn lookup(&self, handle: &str) -> Result<Vec<String>> {
        let handle = normalize_handle(handle)?;
        if let Some(hit) = self.cache.get(&handle) {
            return Ok(hit.clone());
        }

        let mut last_error = None;
        let mut answered = false;

        for provider in &self.providers {
            match self.lookup_with_retry(provider.as_ref(), &handle).await {
                Ok(addresses) => {
                    answered = true;
                    let valid = valid_addresses(addresses);
                    if !valid.is_empty() {
                        debug!("Resolved @{} via {}", handle, provider.name());
                        self.cache.insert(handle, valid.clone());
                        return Ok(valid);
                    }
                    debug!("{} has no address for @{}", provider.name(), handle);
                }
                Err(e) => {
                    warn!("Identity provider {} failed for @{}: {}", provider.name(), handle, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(Vec::new()),
        }
    }

    async fn lookup_with_retry(&self, provider: &dyn IdentityProvider, handle: &str) -> Result<Vec<String>> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.retry.initial_interval_ms),
            max_interval: Duration::from_millis(self.retry.max_interval_ms),
            max_elapsed_time: Some(Duration::from_millis(self.retry.max_elapsed_ms)),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let max_attempts = self.retry.max_attempts.max(1);

        retry(backoff, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match provider.lookup(handle).await {
                Ok(addresses) => Ok(addresses),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!("Retryable error from {} (attempt {}): {}", provider.name(), attempt, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// Fill `recipient` for targets that carry a handle
    ///
    /// Lookups run a few at a time. Failures leave the recipient empty; the
    /// target is still deployed.
    pub async fn resolve_targets(&self, mut targets: Vec<Target>) -> Vec<Target> {
        if self.providers.is_empty() {
            return targets;
        }

        let lookups = targets.iter().map(|target| async move {
            match (&target.recipient, &target.handle) {
                (None, Some(handle)) => Some(self.lookup(handle).await),
                _ => None,
            }
        });
        let results: Vec<Option<Result<Vec<String>>>> = stream::iter(lookups)
            .buffered(LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let mut resolved = 0;
        for (target, result) in targets.iter_mut().zip(results) {
            let handle = target.handle.clone().unwrap_or_default();
            match result {
                None => {}
                Some(Ok(addresses)) => match addresses.into_iter().next() {
                    Some(address) => {
                        target.recipient = Some(address);
                        resolved += 1;
                    }
                    None => warn!("No address found for {} (target '{}')", handle, target.name),
                },
                Some(Err(e)) => warn!("Could not resolve {} (target '{}'): {}", handle, target.name, e),
            }
        }

        if resolved > 0 {
            info!("Resolved {} recipient(s) from handles", resolved);
        }
        targets
    }
}

fn valid_addresses(addresses: Vec<String>) -> Vec<String> {
    addresses
        .into_iter()
        .filter(|a| Pubkey::from_str(a).is_ok())
        .collect()
}

/// One configured HTTP provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderSettings {
    pub name: String,
    /// URL with a `{handle}` placeholder
    pub url_template: String,
    /// Environment variable holding the API key, if the provider needs one
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_provider_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    List(Vec<String>),
    Many { addresses: Vec<String> },
    One { address: Option<String> },
}

impl LookupResponse {
    fn into_addresses(self) -> Vec<String> {
        match self {
            LookupResponse::List(list) => list,
            LookupResponse::Many { addresses } => addresses,
            LookupResponse::One { address } => address.into_iter().collect(),
        }
    }
}

/// JSON-over-HTTP identity provider
pub struct HttpIdentityProvider {
    name: String,
    url_template: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpIdentityProvider {
    pub fn new(settings: &HttpProviderSettings) -> Result<Self> {
        if !settings.url_template.contains("{handle}") {
            return Err(Error::InvalidConfig(format!(
                "identity provider '{}': url_template needs a {{handle}} placeholder",
                settings.name
            )));
        }
        url::Url::parse(&settings.url_template.replace("{handle}", "probe")).map_err(|e| {
            Error::InvalidConfig(format!("identity provider '{}': {}", settings.name, e))
        })?;

        let api_key = settings
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());

        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;

        Ok(Self {
            name: settings.name.clone(),
            url_template: settings.url_template.clone(),
            api_key,
            client,
        })
    }

    fn url_for(&self, handle: &str) -> String {
        self.url_template.replace("{handle}", handle)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, handle: &str) -> Result<Vec<String>> {
        let mut request = self.client.get(self.url_for(handle));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), body));
        }

        let body: LookupResponse = response.json().await?;
        Ok(body.into_addresses())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Keypair;
    use solana_sdk::signer::Signer;
    use std::sync::Mutex;

    enum Reply {
        Addresses(Vec<String>),
        Transient,
        Terminal,
    }

    struct ScriptedProvider {
        name: String,
        replies: Mutex<Vec<Reply>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(name: &str, mut replies: Vec<Reply>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                name: name.to_string(),
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn lookup(&self, _handle: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.lock().unwrap().pop();
            match reply {
                Some(Reply::Addresses(a)) => Ok(a),
                Some(Reply::Transient) => Err(Error::RemoteUnavailable {
                    status: 503,
                    message: "busy".into(),
                }),
                Some(Reply::Terminal) | None => Err(Error::Unauthorized("no key".into())),
            }
        }
    }

    fn fast_retry() -> IdentityRetry {
        IdentityRetry {
            max_attempts: 3,
            initial_interval_ms: 1,
            max_interval_ms: 2,
            max_elapsed_ms: 1_000,
        }
    }

    fn address() -> String {
        Keypair::new().pubkey().to_string()
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("@Alice_01").unwrap(), "alice_01");
        assert_eq!(normalize_handle(" bob ").unwrap(), "bob");
        assert!(normalize_handle("not a handle").is_err());
        assert!(normalize_handle("@").is_err());
        assert!(normalize_handle("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_transient_errors_retried_within_provider() {
        let addr = address();
        let provider = ScriptedProvider::new(
            "primary",
            vec![Reply::Transient, Reply::Addresses(vec![addr.clone()])],
        );
        let directory = IdentityDirectory::new(fast_retry()).with_provider(provider.clone());

        assert_eq!(directory.lookup("@alice").await.unwrap(), vec![addr]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let addr = address();
        let primary = ScriptedProvider::new("primary", vec![Reply::Terminal]);
        let secondary = ScriptedProvider::new("secondary", vec![Reply::Addresses(vec![addr.clone()])]);
        let directory = IdentityDirectory::new(fast_retry())
            .with_provider(primary.clone())
            .with_provider(secondary.clone());

        assert_eq!(directory.lookup("alice").await.unwrap(), vec![addr]);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_addresses_are_a_miss() {
        let addr = address();
        let primary = ScriptedProvider::new("primary", vec![Reply::Addresses(vec!["nope".into()])]);
        let secondary = ScriptedProvider::new("secondary", vec![Reply::Addresses(vec![addr.clone()])]);
        let directory = IdentityDirectory::new(fast_retry())
            .with_provider(primary)
            .with_provider(secondary);

        assert_eq!(directory.lookup("alice").await.unwrap(), vec![addr]);
    }

    #[tokio::test]
    async fn test_all_providers_fail() {
        let primary = ScriptedProvider::new(
            "primary",
            vec![Reply::Transient, Reply::Transient, Reply::Transient, Reply::Transient],
        );
        let directory = IdentityDirectory::new(fast_retry()).with_provider(primary.clone());

        let err = directory.lookup("alice").await.unwrap_err();
        assert_eq!(err.code(), "REMOTE_UNAVAILABLE");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_results_cached() {
        let addr = address();
        let provider = ScriptedProvider::new("primary", vec![Reply::Addresses(vec![addr.clone()])]);
        let directory = IdentityDirectory::new(fast_retry()).with_provider(provider.clone());

        directory.lookup("@Alice").await.unwrap();
        assert_eq!(directory.lookup("alice").await.unwrap(), vec![addr]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_targets_fills_recipients() {
        let addr = address();
        let provider = ScriptedProvider::new("primary", vec![Reply::Addresses(vec![addr.clone()])]);
        let directory = IdentityDirectory::new(fast_retry()).with_provider(provider);

        let mut with_handle = Target::new("t1", "Alpha");
        with_handle.handle = Some("@alpha".into());
        let mut preset = Target::new("t2", "Beta");
        preset.handle = Some("@beta".into());
        preset.recipient = Some("fixed".into());
        let plain = Target::new("t3", "Gamma");

        let targets = directory.resolve_targets(vec![with_handle, preset, plain]).await;
        assert_eq!(targets[0].recipient.as_deref(), Some(addr.as_str()));
        assert_eq!(targets[1].recipient.as_deref(), Some("fixed"));
        assert!(targets[2].recipient.is_none());
    }

    #[test]
    fn test_http_provider_template_validation() {
        let mut settings = HttpProviderSettings {
            name: "dir".into(),
            url_template: "https://directory.example.com/v1/handles/{handle}".into(),
            api_key_env: None,
            timeout_ms: 1_000,
        };
        let provider = HttpIdentityProvider::new(&settings).unwrap();
        assert_eq!(
            provider.url_for("alice"),
            "https://directory.example.com/v1/handles/alice"
        );

        settings.url_template = "https://directory.example.com/v1/handles".into();
        assert_eq!(
            HttpIdentityProvider::new(&settings).err().unwrap().code(),
            "INVALID_CONFIG"
        );
    }

    #[test]
    fn test_lookup_response_shapes() {
        let list: LookupResponse = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(list.into_addresses(), vec!["a", "b"]);
        let many: LookupResponse = serde_json::from_str(r#"{"addresses":["a"]}"#).unwrap();
        assert_eq!(many.into_addresses(), vec!["a"]);
        let none: LookupResponse = serde_json::from_str(r#"{"address":null}"#).unwrap();
        assert!(none.into_addresses().is_empty());
    }
}
