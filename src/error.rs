//! Error types for the batch deployer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes, used to decide how far an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input; the batch never starts
    Validation,
    /// Vault operation failed
    Wallet,
    /// Remote failure worth retrying
    Transient,
    /// Remote failure that retrying will not fix
    Terminal,
    /// Dependency currently unhealthy, call not attempted
    CircuitOpen,
    /// Local I/O, crypto, config or internal failures
    Infrastructure,
}

/// Main error type for the deployer
///
/// Messages never carry passwords or raw secrets.
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("No targets supplied")]
    NoTargets,

    #[error("No wallets supplied")]
    NoWallets,

    #[error("Invalid wallet secret: {0}")]
    InvalidSecret(String),

    #[error("Capacity exceeded: {targets} targets but only {capacity} slots ({shortfall} short)")]
    CapacityExceeded {
        targets: usize,
        capacity: usize,
        shortfall: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Wallet errors
    #[error("Invalid password for wallet {0}")]
    InvalidPassword(String),

    #[error("Wrong password for backup {0}")]
    WrongPassword(String),

    #[error("Wallet already exists: {0}")]
    DuplicateWallet(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    // Transient remote errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Remote unavailable (HTTP {status}): {message}")]
    RemoteUnavailable { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    // Terminal remote errors
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Circuit open for dependency '{dependency}'")]
    CircuitOpen { dependency: String },

    // Infrastructure errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_)
                | Error::RpcTimeout(_)
                | Error::Rpc(_)
                | Error::RemoteUnavailable { .. }
                | Error::Network(_)
        )
    }

    /// Failure class of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NoTargets
            | Error::NoWallets
            | Error::InvalidSecret(_)
            | Error::CapacityExceeded { .. }
            | Error::InvalidConfig(_) => ErrorCategory::Validation,
            Error::InvalidPassword(_)
            | Error::WrongPassword(_)
            | Error::DuplicateWallet(_)
            | Error::WalletNotFound(_) => ErrorCategory::Wallet,
            Error::RateLimited(_)
            | Error::RpcTimeout(_)
            | Error::Rpc(_)
            | Error::RemoteUnavailable { .. }
            | Error::Network(_) => ErrorCategory::Transient,
            Error::InvalidPayload(_) | Error::Unauthorized(_) | Error::Submission(_) => {
                ErrorCategory::Terminal
            }
            Error::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Error::Crypto(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Cancelled
            | Error::Internal(_)
            | Error::Anyhow(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoTargets => "NO_TARGETS",
            Error::NoWallets => "NO_WALLETS",
            Error::InvalidSecret(_) => "INVALID_SECRET",
            Error::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidPassword(_) => "INVALID_PASSWORD",
            Error::WrongPassword(_) => "WRONG_PASSWORD",
            Error::DuplicateWallet(_) => "DUPLICATE_WALLET",
            Error::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::RpcTimeout(_) => "RPC_TIMEOUT",
            Error::Rpc(_) => "RPC_ERROR",
            Error::RemoteUnavailable { .. } => "REMOTE_UNAVAILABLE",
            Error::Network(_) => "NETWORK_ERROR",
            Error::InvalidPayload(_) => "INVALID_PAYLOAD",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::Submission(_) => "SUBMISSION_FAILED",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::Crypto(_) => "CRYPTO_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Anyhow(_) => "INTERNAL_ERROR",
        }
    }

    /// Map an HTTP status from a remote dependency to an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Error::RateLimited(message),
            401 | 403 => Error::Unauthorized(message),
            400 | 404 | 409 | 422 => Error::InvalidPayload(message),
            408 => Error::Network(message),
            s if s >= 500 => Error::RemoteUnavailable { status: s, message },
            _ => Error::Submission(format!("HTTP {}: {}", status, message)),
        }
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Error::from_status(status.as_u16(), e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return Error::Network(e.to_string());
        }
        if e.is_decode() {
            return Error::Serialization(e.to_string());
        }
        Error::Network(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
