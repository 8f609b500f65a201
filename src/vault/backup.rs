//! Wallet backup export and import
//!
//! One self-contained encrypted file per export, written to the vault's
//! backups/ directory with a timestamped name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use solana_sdk::signer::Signer;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::credentials::{normalize_phrase, write_private, CredentialVault};
use super::crypto;
use super::signer::{canonical_secret, parse_secret, short_address};
use super::types::{
    BackupFile, ImportedBackup, BACKUP_TYPE, BACKUP_VERSION, BACKUP_WARNING,
};

impl CredentialVault {
    /// Export an encrypted backup of `secret`
    ///
    /// The secret does not need to be stored in the vault.
    pub fn export_backup(
        &self,
        secret: &str,
        password: &str,
        label: Option<&str>,
        phrase: Option<&str>,
    ) -> Result<PathBuf> {
        if password.is_empty() {
            return Err(Error::InvalidConfig("backup password must not be empty".to_string()));
        }

        let keypair = parse_secret(secret)?;
        let address = keypair.pubkey().to_string();

        let encrypted = crypto::encrypt(canonical_secret(&keypair).as_bytes(), password)?;
        let encrypted_mnemonic = match phrase {
            Some(p) => Some(crypto::encrypt(normalize_phrase(p)?.as_bytes(), password)?),
            None => None,
        };

        let created_at = Utc::now();
        let backup = BackupFile {
            version: BACKUP_VERSION,
            kind: BACKUP_TYPE.to_string(),
            address: address.clone(),
            name: label.map(|l| l.to_string()),
            encrypted,
            encrypted_mnemonic,
            created_at,
            warning: BACKUP_WARNING.to_string(),
        };

        let dir = self.backup_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Io(format!("Failed to create backup dir: {}", e)))?;

        let file_name = format!(
            "wallet-{}-{}.json",
            &address[..address.len().min(8)],
            created_at.format("%Y%m%d-%H%M%S%3f")
        );
        let path = dir.join(file_name);

        let json = serde_json::to_string_pretty(&backup)?;
        write_private(&path, json.as_bytes())?;

        info!(
            "Exported backup for {} to {}",
            short_address(&address),
            path.display()
        );
        Ok(path)
    }

    /// Import a backup file
    ///
    /// Fails with `WrongPassword` when the envelope does not open or the key
    /// inside does not sign for the embedded address.
    pub fn import_backup(&self, path: &Path, password: &str) -> Result<ImportedBackup> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("Failed to read backup {}: {}", path.display(), e)))?;
        let backup: BackupFile = serde_json::from_str(&content)?;

        if backup.kind != BACKUP_TYPE {
            return Err(Error::InvalidConfig(format!(
                "{} is not a wallet backup (type '{}')",
                path.display(),
                backup.kind
            )));
        }

        let wrong_password = || Error::WrongPassword(backup.address.clone());

        let secret = crypto::decrypt_string(&backup.encrypted, password).ok_or_else(wrong_password)?;
        let recovered = parse_secret(&secret)
            .map_err(|_| wrong_password())?
            .pubkey()
            .to_string();
        if recovered != backup.address {
            return Err(wrong_password());
        }

        let phrase = match &backup.encrypted_mnemonic {
            Some(envelope) => Some(crypto::decrypt_string(envelope, password).ok_or_else(wrong_password)?),
            None => None,
        };

        info!("Imported backup for {}", short_address(&backup.address));

        Ok(ImportedBackup {
            address: backup.address.clone(),
            name: backup.name.clone(),
            secret,
            phrase,
        })
    }

    /// Backup files in the backup directory, newest first
    ///
    /// Ordered by the creation time recorded inside each file. Files that are
    /// not wallet backups are left out.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<(DateTime<Utc>, PathBuf)> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|path| match read_backup(&path) {
                Some(backup) => Some((backup.created_at, path)),
                None => {
                    debug!("Skipping {}: not a wallet backup", path.display());
                    None
                }
            })
            .collect();

        backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }
}

fn read_backup(path: &Path) -> Option<BackupFile> {
    let content = std::fs::read_to_string(path).ok()?;
    let backup: BackupFile = serde_json::from_str(&content).ok()?;
    (backup.kind == BACKUP_TYPE).then_some(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Keypair;
    use tempfile::tempdir;

    const PHRASE: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";

    #[test]
    fn test_export_import_round_trip() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        let keypair = Keypair::new();
        let sk = keypair.to_base58_string();

        let path = vault
            .export_backup(&sk, "backup-pw", Some("cold"), Some(PHRASE))
            .unwrap();
        assert!(path.starts_with(vault.backup_dir()));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"type\": \"wallet-backup\""));
        assert!(!raw.contains(&sk));

        let imported = vault.import_backup(&path, "backup-pw").unwrap();
        assert_eq!(imported.address, keypair.pubkey().to_string());
        assert_eq!(imported.secret.as_str(), sk);
        assert_eq!(imported.phrase.unwrap().as_str(), PHRASE);
        assert_eq!(imported.name.as_deref(), Some("cold"));
    }

    #[test]
    fn test_import_wrong_password() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        let sk = Keypair::new().to_base58_string();
        let path = vault.export_backup(&sk, "right", None, None).unwrap();

        let err = vault.import_backup(&path, "wrong").unwrap_err();
        assert_eq!(err.code(), "WRONG_PASSWORD");
    }

    #[test]
    fn test_import_address_mismatch() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        let sk = Keypair::new().to_base58_string();
        let path = vault.export_backup(&sk, "pw", None, None).unwrap();

        let mut backup: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        backup["address"] = serde_json::Value::String(Keypair::new().pubkey().to_string());
        std::fs::write(&path, backup.to_string()).unwrap();

        let err = vault.import_backup(&path, "pw").unwrap_err();
        assert_eq!(err.code(), "WRONG_PASSWORD");
    }

    #[test]
    fn test_list_backups() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        assert!(vault.list_backups().unwrap().is_empty());

        vault
            .export_backup(&Keypair::new().to_base58_string(), "pw", None, None)
            .unwrap();
        vault
            .export_backup(&Keypair::new().to_base58_string(), "pw", None, None)
            .unwrap();
        assert_eq!(vault.list_backups().unwrap().len(), 2);

        std::fs::write(vault.backup_dir().join("notes.json"), "{}").unwrap();
        assert_eq!(vault.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_list_backups_newest_first_across_wallets() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();

        // Older backup gets the address that sorts last by name
        let mut keys = vec![Keypair::new(), Keypair::new()];
        keys.sort_by_key(|k| std::cmp::Reverse(k.pubkey().to_string()));

        let older = vault
            .export_backup(&keys[0].to_base58_string(), "pw", None, None)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = vault
            .export_backup(&keys[1].to_base58_string(), "pw", None, None)
            .unwrap();

        assert_eq!(vault.list_backups().unwrap(), vec![newer, older]);
    }
}
