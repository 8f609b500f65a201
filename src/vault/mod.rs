//! Credential vault module
//!
//! Password-encrypted storage for deployer wallet secrets:
//! - Wallet store (vault.json) with a single active wallet
//! - Envelope encryption (PBKDF2-SHA256 + AES-256-GCM)
//! - Backup export/import
//! - Migration of legacy store versions and envelopes
//!
//! # Architecture
//!
//! ```text
//! secret ──parse──> SigningContext
//!    │
//!    └──encrypt──> WalletRecord ──> VaultStore (vault.json)
//!                                        │
//!                            backups/wallet-*.json
//! ```
//!
//! # Security
//!
//! - Wrong password, failed tag check and corrupt data are indistinguishable
//! - Secrets are held in zeroizing buffers and never logged
//! - Store and backup files are written 0600 on Unix

pub mod backup;
pub mod credentials;
pub mod crypto;
pub mod signer;
pub mod types;

pub use credentials::CredentialVault;
pub use signer::{derive_address, parse_secret, short_address, SigningContext};
pub use types::{BackupFile, ImportedBackup, Secret, VaultStore, WalletRecord};
