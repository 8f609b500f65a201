//! Credential vault
//!
//! Loads the wallet store from vault.json and manages encrypted secrets.
//! Every mutation rewrites the whole file (temp file + rename).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use solana_sdk::signer::Signer;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::crypto::{self, EnvelopeKind};
use super::signer::{canonical_secret, parse_secret, short_address, SigningContext};
use super::types::{LegacyStoreV1, Secret, VaultStore, WalletRecord, STORE_VERSION};

/// Store file name inside the vault directory
pub const STORE_FILE: &str = "vault.json";

/// Backup directory name inside the vault directory
pub const BACKUP_DIR: &str = "backups";

/// Word counts accepted for recovery phrases
const PHRASE_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Password-encrypted wallet store
pub struct CredentialVault {
    /// Directory holding vault.json and backups/
    dir: PathBuf,

    /// In-memory copy of the store, always in the current shape
    store: VaultStore,

    /// Signing context of the active wallet, set when its secret was supplied
    default_signer: Option<SigningContext>,
}

impl CredentialVault {
    /// Open the vault in `dir`
    ///
    /// A missing store file yields an empty vault. Older store versions are
    /// migrated in memory; the migrated shape is written on the next mutation.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(STORE_FILE);

        let store = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("Failed to read {}: {}", STORE_FILE, e)))?;
            Self::parse_store(&content)?
        } else {
            debug!("{} not found, starting with empty vault", STORE_FILE);
            VaultStore::default()
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    warn!(
                        "Vault file {} has insecure permissions {:o}; it will be tightened on next write",
                        path.display(),
                        mode & 0o777
                    );
                }
            }
        }

        info!("Loaded vault with {} wallets", store.wallets.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            store,
            default_signer: None,
        })
    }

    /// Parse store JSON of any known version into the current shape
    fn parse_store(content: &str) -> Result<VaultStore> {
        let raw: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| Error::Serialization(format!("Failed to parse {}: {}", STORE_FILE, e)))?;

        let version = match raw.get("version") {
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(1.0),
            Some(serde_json::Value::String(s)) => s.parse::<f64>().unwrap_or(1.0),
            _ => 1.0,
        };

        if version >= STORE_VERSION as f64 {
            let mut store: VaultStore = serde_json::from_value(raw)?;
            Self::normalize_active(&mut store);
            Ok(store)
        } else {
            let legacy: LegacyStoreV1 = serde_json::from_value(raw)?;
            info!(
                "Migrating vault store from version {} to {}",
                version, STORE_VERSION
            );
            Ok(legacy.migrate())
        }
    }

    /// Enforce the single-active invariant on a loaded store
    fn normalize_active(store: &mut VaultStore) {
        let active = store
            .active_address
            .clone()
            .filter(|a| store.wallets.iter().any(|w| &w.address == a))
            .or_else(|| {
                store
                    .wallets
                    .iter()
                    .find(|w| w.is_active)
                    .map(|w| w.address.clone())
            });

        for wallet in &mut store.wallets {
            wallet.is_active = active.as_deref() == Some(wallet.address.as_str());
        }
        store.active_address = active;
    }

    /// Vault directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backup directory
    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    /// List all wallet records in insertion order
    pub fn list_wallets(&self) -> &[WalletRecord] {
        &self.store.wallets
    }

    /// Get wallet record by address
    pub fn get_wallet(&self, address: &str) -> Option<&WalletRecord> {
        self.store.wallets.iter().find(|w| w.address == address)
    }

    /// The active wallet record, if any
    pub fn active_wallet(&self) -> Option<&WalletRecord> {
        let address = self.store.active_address.as_deref()?;
        self.get_wallet(address)
    }

    /// Signing context of the active wallet
    ///
    /// Only available after the active wallet's secret was supplied in this
    /// process (add with activation, or `set_active`).
    pub fn active_signer(&self) -> Option<&SigningContext> {
        self.default_signer.as_ref()
    }

    /// Add a wallet from its secret
    pub fn add_wallet(
        &mut self,
        secret: &str,
        label: &str,
        password: &str,
        activate: bool,
    ) -> Result<WalletRecord> {
        self.insert_wallet(secret, None, label, password, activate)
    }

    /// Add a wallet together with the recovery phrase it was derived from
    pub fn add_wallet_with_recovery_phrase(
        &mut self,
        secret: &str,
        phrase: &str,
        derivation_index: u32,
        label: &str,
        password: &str,
        activate: bool,
    ) -> Result<WalletRecord> {
        let normalized = normalize_phrase(phrase)?;
        self.insert_wallet(
            secret,
            Some((normalized, derivation_index)),
            label,
            password,
            activate,
        )
    }

    fn insert_wallet(
        &mut self,
        secret: &str,
        phrase: Option<(Secret, u32)>,
        label: &str,
        password: &str,
        activate: bool,
    ) -> Result<WalletRecord> {
        if password.is_empty() {
            return Err(Error::InvalidConfig("vault password must not be empty".to_string()));
        }

        let keypair = parse_secret(secret)?;
        let address = keypair.pubkey().to_string();

        if self.get_wallet(&address).is_some() {
            return Err(Error::DuplicateWallet(address));
        }

        let canonical = canonical_secret(&keypair);
        let encrypted_key = crypto::encrypt(canonical.as_bytes(), password)?;

        let (encrypted_mnemonic, derivation_index) = match phrase {
            Some((phrase, index)) => (
                Some(crypto::encrypt(phrase.as_bytes(), password)?),
                Some(index),
            ),
            None => (None, None),
        };

        let name = if label.trim().is_empty() {
            format!("wallet-{}", self.store.wallets.len() + 1)
        } else {
            label.trim().to_string()
        };

        let record = WalletRecord {
            address: address.clone(),
            name: name.clone(),
            encrypted_key,
            encrypted_mnemonic,
            derivation_index,
            created_at: Utc::now(),
            is_active: false,
        };

        let mut store = self.store.clone();
        store.wallets.push(record);

        // First wallet becomes active even without the flag
        let activate = activate || store.active_address.is_none();
        if activate {
            mark_active(&mut store, &address);
        }

        self.commit(store)?;
        if activate {
            self.default_signer = Some(SigningContext::new(keypair, Some(name.clone())));
        }

        info!("Added wallet {} ({})", short_address(&address), name);

        // Lookup after save so the returned record reflects the final flags
        self.get_wallet(&address)
            .cloned()
            .ok_or_else(|| Error::Internal("wallet vanished after insert".to_string()))
    }

    /// Remove a wallet
    ///
    /// Removing the active wallet promotes the first remaining record.
    pub fn remove_wallet(&mut self, address: &str) -> Result<()> {
        let index = self
            .store
            .wallets
            .iter()
            .position(|w| w.address == address)
            .ok_or_else(|| Error::WalletNotFound(address.to_string()))?;

        let mut store = self.store.clone();
        let removed = store.wallets.remove(index);

        if removed.is_active {
            match store.wallets.first().map(|w| w.address.clone()) {
                Some(next) => mark_active(&mut store, &next),
                None => store.active_address = None,
            }
        }

        self.commit(store)?;
        if removed.is_active {
            self.default_signer = None;
            if let Some(next) = &self.store.active_address {
                info!("Promoted {} to active wallet", short_address(next));
            }
        }
        info!("Removed wallet {}", short_address(address));
        Ok(())
    }

    /// Rename a wallet
    pub fn rename_wallet(&mut self, address: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfig("wallet name must not be empty".to_string()));
        }

        let mut store = self.store.clone();
        let wallet = store
            .wallets
            .iter_mut()
            .find(|w| w.address == address)
            .ok_or_else(|| Error::WalletNotFound(address.to_string()))?;
        wallet.name = name.to_string();

        self.commit(store)
    }

    /// Make `address` the active wallet
    ///
    /// The password must decrypt the record to a key that signs for
    /// `address`. A legacy envelope is upgraded to the current scheme.
    pub fn set_active(&mut self, address: &str, password: &str) -> Result<()> {
        let record = self
            .get_wallet(address)
            .cloned()
            .ok_or_else(|| Error::WalletNotFound(address.to_string()))?;

        let (plain, kind) = crypto::decrypt_with_kind(&record.encrypted_key, password)
            .ok_or_else(|| Error::InvalidPassword(address.to_string()))?;

        let secret = std::str::from_utf8(&plain)
            .map_err(|_| Error::InvalidPassword(address.to_string()))?;
        let keypair =
            parse_secret(secret).map_err(|_| Error::InvalidPassword(address.to_string()))?;

        if keypair.pubkey().to_string() != record.address {
            return Err(Error::InvalidPassword(address.to_string()));
        }

        let mut store = self.store.clone();
        if kind == EnvelopeKind::Legacy {
            upgrade_envelopes(&mut store, &record, &keypair, password)?;
        }
        mark_active(&mut store, address);

        self.commit(store)?;
        self.default_signer = Some(SigningContext::new(keypair, Some(record.name.clone())));

        info!("Active wallet set to {}", short_address(address));
        Ok(())
    }

    /// Decrypt a wallet's secret
    ///
    /// `None` when the wallet is absent, the password is wrong, or the
    /// envelope is corrupt.
    pub fn decrypt_secret(&self, address: &str, password: &str) -> Option<Secret> {
        let record = self.get_wallet(address)?;
        let secret = crypto::decrypt_string(&record.encrypted_key, password)?;
        let keypair = parse_secret(&secret).ok()?;
        if keypair.pubkey().to_string() != record.address {
            return None;
        }
        Some(secret)
    }

    /// Decrypt a wallet's recovery phrase
    pub fn decrypt_recovery_phrase(&self, address: &str, password: &str) -> Option<Secret> {
        let record = self.get_wallet(address)?;
        let envelope = record.encrypted_mnemonic.as_ref()?;
        crypto::decrypt_string(envelope, password)
    }

    /// Decrypt up to `count` wallets into signing contexts
    ///
    /// The active wallet comes first, the rest in insertion order. Records
    /// that do not open under `password` are skipped with a warning.
    pub fn resolve_signers(&self, password: &str, count: usize) -> Result<Vec<SigningContext>> {
        if self.store.wallets.is_empty() {
            return Err(Error::NoWallets);
        }

        let mut ordered: Vec<&WalletRecord> = self.store.wallets.iter().collect();
        ordered.sort_by_key(|w| !w.is_active);

        let mut signers = Vec::new();
        for record in ordered {
            if signers.len() >= count {
                break;
            }
            match self.decrypt_secret(&record.address, password) {
                Some(secret) => {
                    signers.push(SigningContext::from_secret(&secret, Some(record.name.clone()))?)
                }
                None => warn!(
                    "Skipping wallet {} ({}): could not decrypt with supplied password",
                    short_address(&record.address),
                    record.name
                ),
            }
        }

        debug!("Resolved {} signers from vault", signers.len());
        Ok(signers)
    }

    /// Persist `store` and make it the in-memory copy
    ///
    /// On a failed write the in-memory store is left untouched.
    fn commit(&mut self, store: VaultStore) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Io(format!("Failed to create vault dir: {}", e)))?;

        let json = serde_json::to_string_pretty(&store)
            .map_err(|e| Error::Serialization(format!("Failed to serialize vault: {}", e)))?;

        write_private(&self.dir.join(STORE_FILE), json.as_bytes())?;
        self.store = store;

        debug!("Saved vault store");
        Ok(())
    }
}

fn mark_active(store: &mut VaultStore, address: &str) {
    for wallet in &mut store.wallets {
        wallet.is_active = wallet.address == address;
    }
    store.active_address = Some(address.to_string());
}

/// Re-encrypt a legacy record under the current scheme
fn upgrade_envelopes(
    store: &mut VaultStore,
    record: &WalletRecord,
    keypair: &solana_sdk::signature::Keypair,
    password: &str,
) -> Result<()> {
    let canonical = canonical_secret(keypair);
    let encrypted_key = crypto::encrypt(canonical.as_bytes(), password)?;

    let encrypted_mnemonic = match &record.encrypted_mnemonic {
        Some(envelope) => match crypto::decrypt(envelope, password) {
            Some(phrase) => Some(crypto::encrypt(&phrase, password)?),
            None => {
                warn!(
                    "Recovery phrase for {} could not be upgraded, keeping legacy envelope",
                    short_address(&record.address)
                );
                Some(envelope.clone())
            }
        },
        None => None,
    };

    if let Some(wallet) = store
        .wallets
        .iter_mut()
        .find(|w| w.address == record.address)
    {
        wallet.encrypted_key = encrypted_key;
        wallet.encrypted_mnemonic = encrypted_mnemonic;
        info!(
            "Upgraded legacy envelope for {}",
            short_address(&record.address)
        );
    }
    Ok(())
}

/// Write a file readable by the owner only, via temp file + rename
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let write_err = |e: std::io::Error| Error::Io(format!("Failed to write {}: {}", tmp.display(), e));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp).map_err(write_err)?;
    // A leftover temp file keeps its old mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(write_err)?;
    }
    file.write_all(contents).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    std::fs::rename(&tmp, path)
        .map_err(|e| Error::Io(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

/// Collapse whitespace and check the word count of a recovery phrase
pub(crate) fn normalize_phrase(phrase: &str) -> Result<Secret> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if !PHRASE_WORD_COUNTS.contains(&words.len()) {
        return Err(Error::InvalidSecret(format!(
            "recovery phrase must have 12, 15, 18, 21 or 24 words, got {}",
            words.len()
        )));
    }
    Ok(Zeroizing::new(words.join(" ").to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Keypair;
    use tempfile::tempdir;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn secret() -> (String, String) {
        let keypair = Keypair::new();
        (keypair.to_base58_string(), keypair.pubkey().to_string())
    }

    #[test]
    fn test_open_empty_vault() {
        let dir = tempdir().unwrap();
        let vault = CredentialVault::open(dir.path()).unwrap();
        assert!(vault.list_wallets().is_empty());
        assert!(vault.active_wallet().is_none());
    }

    #[test]
    fn test_add_and_reload() {
        let dir = tempdir().unwrap();
        let (sk, address) = secret();

        {
            let mut vault = CredentialVault::open(dir.path()).unwrap();
            let record = vault.add_wallet(&sk, "main", "pw", false).unwrap();
            assert_eq!(record.address, address);
            // First wallet is activated automatically
            assert!(record.is_active);
        }

        let vault = CredentialVault::open(dir.path()).unwrap();
        assert_eq!(vault.list_wallets().len(), 1);
        assert_eq!(vault.active_wallet().unwrap().address, address);
        assert_eq!(vault.decrypt_secret(&address, "pw").unwrap().as_str(), sk);
        assert!(vault.decrypt_secret(&address, "nope").is_none());

        let raw = std::fs::read_to_string(dir.path().join(STORE_FILE)).unwrap();
        assert!(!raw.contains(&sk));
        assert!(raw.contains("\"activeAddress\""));
    }

    #[cfg(unix)]
    #[test]
    fn test_store_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let (sk, _) = secret();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        vault.add_wallet(&sk, "main", "pw", true).unwrap();

        let mode = std::fs::metadata(dir.path().join(STORE_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_duplicate_and_invalid_secret() {
        let dir = tempdir().unwrap();
        let (sk, _) = secret();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        vault.add_wallet(&sk, "main", "pw", true).unwrap();

        let err = vault.add_wallet(&sk, "again", "pw", false).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_WALLET");

        let err = vault.add_wallet("garbage", "bad", "pw", false).unwrap_err();
        assert_eq!(err.code(), "INVALID_SECRET");
        assert_eq!(vault.list_wallets().len(), 1);
    }

    #[test]
    fn test_single_active_wallet() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let (a, _) = secret();
        let (b, b_addr) = secret();
        let (c, c_addr) = secret();

        vault.add_wallet(&a, "a", "pw", true).unwrap();
        vault.add_wallet(&b, "b", "pw", true).unwrap();
        vault.add_wallet(&c, "c", "pw", false).unwrap();

        let active: Vec<_> = vault.list_wallets().iter().filter(|w| w.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].address, b_addr);
        assert_eq!(vault.active_signer().unwrap().address(), b_addr);

        vault.set_active(&c_addr, "pw").unwrap();
        let active: Vec<_> = vault.list_wallets().iter().filter(|w| w.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].address, c_addr);
    }

    #[test]
    fn test_set_active_wrong_password_keeps_previous() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let (a, a_addr) = secret();
        let (b, b_addr) = secret();
        vault.add_wallet(&a, "a", "pw", true).unwrap();
        vault.add_wallet(&b, "b", "pw", false).unwrap();

        let err = vault.set_active(&b_addr, "wrong").unwrap_err();
        assert_eq!(err.code(), "INVALID_PASSWORD");
        assert!(!err.to_string().contains("wrong"));
        assert_eq!(vault.active_wallet().unwrap().address, a_addr);

        let reloaded = CredentialVault::open(dir.path()).unwrap();
        assert_eq!(reloaded.active_wallet().unwrap().address, a_addr);
    }

    #[test]
    fn test_set_active_unknown_wallet() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let err = vault.set_active("missing", "pw").unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_FOUND");
    }

    #[test]
    fn test_remove_active_promotes_first() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let (a, a_addr) = secret();
        let (b, b_addr) = secret();
        let (c, c_addr) = secret();
        vault.add_wallet(&a, "a", "pw", false).unwrap();
        vault.add_wallet(&b, "b", "pw", false).unwrap();
        vault.add_wallet(&c, "c", "pw", false).unwrap();
        vault.set_active(&b_addr, "pw").unwrap();

        vault.remove_wallet(&b_addr).unwrap();
        assert_eq!(vault.active_wallet().unwrap().address, a_addr);
        assert!(vault.active_signer().is_none());

        vault.remove_wallet(&a_addr).unwrap();
        assert_eq!(vault.active_wallet().unwrap().address, c_addr);

        vault.remove_wallet(&c_addr).unwrap();
        assert!(vault.active_wallet().is_none());

        let err = vault.remove_wallet(&c_addr).unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_FOUND");
    }

    #[test]
    fn test_failed_write_leaves_vault_unchanged() {
        let dir = tempdir().unwrap();
        let (sk1, addr1) = secret();
        let (sk2, addr2) = secret();
        let (sk3, _) = secret();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        vault.add_wallet(&sk1, "one", "pw", true).unwrap();
        vault.add_wallet(&sk2, "two", "pw", false).unwrap();

        // A directory where the temp file goes makes every write fail
        let blocker = dir.path().join("vault.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = vault.add_wallet(&sk3, "three", "pw", true).unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        assert!(vault.set_active(&addr2, "pw").is_err());
        assert!(vault.rename_wallet(&addr1, "renamed").is_err());
        assert!(vault.remove_wallet(&addr1).is_err());

        assert_eq!(vault.list_wallets().len(), 2);
        assert_eq!(vault.active_wallet().unwrap().address, addr1);
        assert_eq!(vault.active_signer().unwrap().address(), addr1);
        assert_eq!(vault.get_wallet(&addr1).unwrap().name, "one");

        // The next successful write carries none of the failed changes
        std::fs::remove_dir(&blocker).unwrap();
        vault.rename_wallet(&addr2, "second").unwrap();

        let reopened = CredentialVault::open(dir.path()).unwrap();
        assert_eq!(reopened.list_wallets().len(), 2);
        assert_eq!(reopened.active_wallet().unwrap().address, addr1);
        assert_eq!(reopened.get_wallet(&addr1).unwrap().name, "one");
        assert_eq!(reopened.get_wallet(&addr2).unwrap().name, "second");
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_temp_file_is_tightened() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("vault.tmp");
        std::fs::write(&tmp, b"old").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_private(&dir.path().join(STORE_FILE), b"{}").unwrap();

        let mode = std::fs::metadata(dir.path().join(STORE_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_rename() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let (a, a_addr) = secret();
        vault.add_wallet(&a, "a", "pw", true).unwrap();
        vault.rename_wallet(&a_addr, "deployer-1").unwrap();
        assert_eq!(vault.get_wallet(&a_addr).unwrap().name, "deployer-1");
        assert!(vault.rename_wallet("missing", "x").is_err());
    }

    #[test]
    fn test_recovery_phrase() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let (a, a_addr) = secret();

        let record = vault
            .add_wallet_with_recovery_phrase(&a, PHRASE, 3, "a", "pw", true)
            .unwrap();
        assert_eq!(record.derivation_index, Some(3));
        assert!(record.has_recovery_phrase());

        assert_eq!(
            vault.decrypt_recovery_phrase(&a_addr, "pw").unwrap().as_str(),
            PHRASE
        );
        assert!(vault.decrypt_recovery_phrase(&a_addr, "bad").is_none());

        let (b, _) = secret();
        let err = vault
            .add_wallet_with_recovery_phrase(&b, "too short phrase", 0, "b", "pw", false)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SECRET");
    }

    #[test]
    fn test_legacy_store_migration_and_envelope_upgrade() {
        let dir = tempdir().unwrap();
        let keypair = Keypair::new();
        let address = keypair.pubkey().to_string();
        let legacy_envelope =
            crypto::encrypt_legacy(keypair.to_base58_string().as_bytes(), "pw");

        let legacy = serde_json::json!({
            "version": 1,
            "activeWallet": null,
            "wallets": [
                { "address": address, "label": "old", "encrypted": legacy_envelope, "createdAt": 1700000000000i64 }
            ]
        });
        std::fs::write(dir.path().join(STORE_FILE), legacy.to_string()).unwrap();

        let mut vault = CredentialVault::open(dir.path()).unwrap();
        assert_eq!(vault.list_wallets()[0].name, "old");
        assert!(vault.decrypt_secret(&address, "pw").is_some());

        vault.set_active(&address, "pw").unwrap();
        let upgraded = &vault.get_wallet(&address).unwrap().encrypted_key;
        let (_, kind) = crypto::decrypt_with_kind(upgraded, "pw").unwrap();
        assert_eq!(kind, EnvelopeKind::Current);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(STORE_FILE)).unwrap())
                .unwrap();
        assert_eq!(raw["version"], 2);
        assert_eq!(raw["activeAddress"], address);
    }

    #[test]
    fn test_resolve_signers_active_first() {
        let dir = tempdir().unwrap();
        let mut vault = CredentialVault::open(dir.path()).unwrap();
        let (a, _) = secret();
        let (b, b_addr) = secret();
        let (c, _) = secret();
        vault.add_wallet(&a, "a", "pw", false).unwrap();
        vault.add_wallet(&b, "b", "pw", true).unwrap();
        vault.add_wallet(&c, "c", "other", false).unwrap();

        let signers = vault.resolve_signers("pw", 5).unwrap();
        assert_eq!(signers.len(), 2);
        assert_eq!(signers[0].address(), b_addr);

        let one = vault.resolve_signers("pw", 1).unwrap();
        assert_eq!(one.len(), 1);
    }
}
