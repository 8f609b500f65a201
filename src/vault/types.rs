//! Core types for the credential vault
//!
//! Defines the persisted store shape (current and legacy), wallet records,
//! and backup files.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A wallet secret held in memory. Zeroized on drop.
pub type Secret = zeroize::Zeroizing<String>;

/// Current on-disk store schema version
pub const STORE_VERSION: u32 = 2;

/// Current backup file format version
pub const BACKUP_VERSION: u32 = 1;

/// Value of the `type` field in backup files
pub const BACKUP_TYPE: &str = "wallet-backup";

/// Warning embedded in every backup file
pub const BACKUP_WARNING: &str =
    "This file contains an encrypted private key. Keep it offline and never share the password.";

/// Wallet record from vault.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    /// Base58 public key derived from the secret
    pub address: String,

    /// Human label
    pub name: String,

    /// Encrypted signing key envelope (base64)
    pub encrypted_key: String,

    /// Encrypted recovery phrase envelope (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_mnemonic: Option<String>,

    /// Account index the key was derived at, when imported from a phrase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_index: Option<u32>,

    /// When the wallet was added
    pub created_at: DateTime<Utc>,

    /// Default signing wallet flag
    #[serde(default)]
    pub is_active: bool,
}

impl WalletRecord {
    /// Whether a recovery phrase is stored alongside the key
    pub fn has_recovery_phrase(&self) -> bool {
        self.encrypted_mnemonic.is_some()
    }
}

/// Vault store file structure (version 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStore {
    /// Store schema version
    pub version: u32,

    /// Address of the active wallet, mirrored from the record flags
    #[serde(default)]
    pub active_address: Option<String>,

    /// Wallet records in insertion order
    #[serde(default)]
    pub wallets: Vec<WalletRecord>,
}

impl Default for VaultStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            active_address: None,
            wallets: Vec::new(),
        }
    }
}

/// Version 1 store shape, read only for migration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyStoreV1 {
    #[serde(default)]
    pub active_wallet: Option<String>,

    #[serde(default)]
    pub wallets: Vec<LegacyRecordV1>,
}

/// Version 1 wallet record
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRecordV1 {
    pub address: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Encrypted key envelope
    pub encrypted: String,

    /// Encrypted recovery phrase envelope
    #[serde(default)]
    pub mnemonic: Option<String>,

    /// Unix milliseconds
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl LegacyStoreV1 {
    /// Convert into the current store shape
    ///
    /// The legacy `activeWallet` field becomes the single active record.
    /// Envelopes are carried over untouched; they are upgraded the next time
    /// the password is supplied.
    pub fn migrate(self) -> VaultStore {
        let active = self.active_wallet.clone();
        let wallets: Vec<WalletRecord> = self
            .wallets
            .into_iter()
            .enumerate()
            .map(|(i, legacy)| {
                let created_at = legacy
                    .created_at
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .unwrap_or_else(Utc::now);
                let is_active = active.as_deref() == Some(legacy.address.as_str());
                WalletRecord {
                    name: legacy
                        .label
                        .filter(|l| !l.trim().is_empty())
                        .unwrap_or_else(|| format!("wallet-{}", i + 1)),
                    address: legacy.address,
                    encrypted_key: legacy.encrypted,
                    encrypted_mnemonic: legacy.mnemonic,
                    derivation_index: None,
                    created_at,
                    is_active,
                }
            })
            .collect();

        let active_address = wallets
            .iter()
            .find(|w| w.is_active)
            .map(|w| w.address.clone());

        VaultStore {
            version: STORE_VERSION,
            active_address,
            wallets,
        }
    }
}

/// Exported backup file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub version: u32,

    /// Always "wallet-backup"
    #[serde(rename = "type")]
    pub kind: String,

    /// Address the encrypted key must reproduce
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Encrypted key envelope
    pub encrypted: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_mnemonic: Option<String>,

    pub created_at: DateTime<Utc>,

    pub warning: String,
}

/// Result of importing a backup file
pub struct ImportedBackup {
    pub address: String,
    pub name: Option<String>,
    pub secret: Secret,
    pub phrase: Option<Secret>,
}

impl std::fmt::Debug for ImportedBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedBackup")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("secret", &"***")
            .field("phrase", &self.phrase.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_camel_case() {
        let record = WalletRecord {
            address: "11111111111111111111111111111111".to_string(),
            name: "main".to_string(),
            encrypted_key: "abc".to_string(),
            encrypted_mnemonic: None,
            derivation_index: Some(0),
            created_at: Utc::now(),
            is_active: true,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"encryptedKey\":\"abc\""));
        assert!(json.contains("\"isActive\":true"));
        assert!(json.contains("\"derivationIndex\":0"));
        assert!(!json.contains("encryptedMnemonic"));
    }

    #[test]
    fn test_legacy_migration() {
        let legacy = r#"{
            "version": 1,
            "activeWallet": "B",
            "wallets": [
                { "address": "A", "label": "first", "encrypted": "e1", "createdAt": 1700000000000 },
                { "address": "B", "encrypted": "e2", "mnemonic": "m2" }
            ]
        }"#;

        let store: LegacyStoreV1 = serde_json::from_str(legacy).unwrap();
        let migrated = store.migrate();

        assert_eq!(migrated.version, STORE_VERSION);
        assert_eq!(migrated.active_address.as_deref(), Some("B"));
        assert_eq!(migrated.wallets[0].name, "first");
        assert_eq!(migrated.wallets[0].created_at.timestamp_millis(), 1700000000000);
        assert!(!migrated.wallets[0].is_active);
        assert_eq!(migrated.wallets[1].name, "wallet-2");
        assert_eq!(migrated.wallets[1].encrypted_mnemonic.as_deref(), Some("m2"));
        assert!(migrated.wallets[1].is_active);
    }

    #[test]
    fn test_backup_type_field() {
        let backup = BackupFile {
            version: BACKUP_VERSION,
            kind: BACKUP_TYPE.to_string(),
            address: "A".to_string(),
            name: None,
            encrypted: "e".to_string(),
            encrypted_mnemonic: None,
            created_at: Utc::now(),
            warning: BACKUP_WARNING.to_string(),
        };
        let json = serde_json::to_string(&backup).unwrap();
        assert!(json.contains("\"type\":\"wallet-backup\""));
    }
}
