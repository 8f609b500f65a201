//! Signing contexts derived from wallet secrets
//!
//! Accepted secret encodings:
//! - base58 64-byte keypair (Phantom / `solana-keygen` export)
//! - base58 32-byte seed
//! - JSON byte array, as written by `solana-keygen new`

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::keypair::keypair_from_seed;
use solana_sdk::signer::Signer;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::types::Secret;

/// Parse a secret into a keypair
///
/// Error messages describe the shape problem only, never the input.
pub fn parse_secret(secret: &str) -> Result<Keypair> {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidSecret("empty secret".to_string()));
    }

    let bytes: Zeroizing<Vec<u8>> = if trimmed.starts_with('[') {
        Zeroizing::new(
            serde_json::from_str::<Vec<u8>>(trimmed)
                .map_err(|_| Error::InvalidSecret("malformed JSON byte array".to_string()))?,
        )
    } else {
        Zeroizing::new(
            bs58::decode(trimmed)
                .into_vec()
                .map_err(|_| Error::InvalidSecret("not valid base58".to_string()))?,
        )
    };

    match bytes.len() {
        64 => Keypair::from_bytes(&bytes)
            .map_err(|_| Error::InvalidSecret("keypair bytes rejected".to_string())),
        32 => keypair_from_seed(&bytes)
            .map_err(|_| Error::InvalidSecret("seed bytes rejected".to_string())),
        n => Err(Error::InvalidSecret(format!(
            "expected 32 or 64 bytes, got {}",
            n
        ))),
    }
}

/// Canonical base58 form of a keypair, the representation stored in the vault
pub fn canonical_secret(keypair: &Keypair) -> Secret {
    Zeroizing::new(keypair.to_base58_string())
}

/// Derive the base58 address a secret signs for
pub fn derive_address(secret: &str) -> Result<String> {
    Ok(parse_secret(secret)?.pubkey().to_string())
}

/// Shorten an address for logs: first 4 and last 4 characters
pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}..{}", &address[..4], &address[address.len() - 4..])
}

/// A wallet ready to sign: keypair plus its address and label
#[derive(Clone)]
pub struct SigningContext {
    keypair: Arc<Keypair>,
    address: String,
    label: Option<String>,
}

impl SigningContext {
    pub fn new(keypair: Keypair, label: Option<String>) -> Self {
        let address = keypair.pubkey().to_string();
        Self {
            keypair: Arc::new(keypair),
            address,
            label,
        }
    }

    /// Parse a secret and wrap it
    pub fn from_secret(secret: &str, label: Option<String>) -> Result<Self> {
        Ok(Self::new(parse_secret(secret)?, label))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl std::fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningContext")
            .field("address", &self.address)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base58_keypair() {
        let keypair = Keypair::new();
        let parsed = parse_secret(&keypair.to_base58_string()).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_parse_json_bytes() {
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let parsed = parse_secret(&json).unwrap();
        assert_eq!(parsed.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_parse_seed() {
        let seed = [42u8; 32];
        let encoded = bs58::encode(seed).into_string();
        let a = parse_secret(&encoded).unwrap();
        let b = parse_secret(&encoded).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_invalid_secrets() {
        for bad in ["", "   ", "0OIl", "[1,2,3", "abc"] {
            let err = parse_secret(bad).unwrap_err();
            assert_eq!(err.code(), "INVALID_SECRET");
        }
    }

    #[test]
    fn test_error_does_not_echo_secret() {
        let secret = "[1,2,3]";
        let err = parse_secret(secret).unwrap_err();
        assert!(!err.to_string().contains(secret));
    }

    #[test]
    fn test_debug_redacts_keypair() {
        let keypair = Keypair::new();
        let secret = keypair.to_base58_string();
        let ctx = SigningContext::new(keypair, Some("main".into()));
        let debug = format!("{:?}", ctx);
        assert!(debug.contains(ctx.address()));
        assert!(!debug.contains(&secret));
    }

    #[test]
    fn test_short_address() {
        assert_eq!(
            short_address("So11111111111111111111111111111111111111112"),
            "So11..1112"
        );
        assert_eq!(short_address("abc"), "abc");
    }
}
