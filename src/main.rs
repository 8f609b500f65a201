//! Batch Deployer - resilient multi-wallet token deployment for pump.fun
//!
//! # WARNING
//! - Every deployment is a real on-chain transaction paid from your wallets.
//! - Keep vault backups somewhere safe; a lost password cannot be recovered.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

// Use the library crate
use batch_deployer::cli::commands::{self, WalletArgs};
use batch_deployer::config::DeployerConfig;

/// Batch Deployer - deploy many tokens across many wallets
#[derive(Parser)]
#[command(name = "deployer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Credential vault management
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Plan and run deployment batches
    Deploy {
        #[command(subcommand)]
        action: DeployAction,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[derive(Subcommand)]
enum VaultAction {
    /// Add a wallet (secret is prompted unless --secret-file is given)
    Add {
        /// Wallet label
        #[arg(long, default_value = "")]
        label: String,

        /// Read the secret from a file instead of prompting
        #[arg(long)]
        secret_file: Option<PathBuf>,

        /// Make this the active wallet
        #[arg(long)]
        activate: bool,
    },

    /// Add a wallet together with its recovery phrase
    AddPhrase {
        /// Wallet label
        #[arg(long, default_value = "")]
        label: String,

        /// Derivation index the secret was derived at
        #[arg(long, default_value = "0")]
        index: u32,

        /// Make this the active wallet
        #[arg(long)]
        activate: bool,
    },

    /// List vault wallets
    List,

    /// Remove a wallet
    Remove {
        address: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Rename a wallet
    Rename { address: String, name: String },

    /// Make a wallet the active one
    Activate { address: String },

    /// Export an encrypted backup
    Export {
        address: String,

        /// Include the recovery phrase
        #[arg(long)]
        with_phrase: bool,
    },

    /// Import a backup file
    Import {
        path: PathBuf,

        /// Make the imported wallet active
        #[arg(long)]
        activate: bool,
    },

    /// List backup files
    Backups,
}

#[derive(Args)]
struct DeployArgs {
    /// JSON file with the targets to deploy
    #[arg(short, long)]
    targets: PathBuf,

    /// File with wallet secrets (one per line or a JSON array)
    #[arg(long, conflicts_with = "wallets")]
    secrets_file: Option<PathBuf>,

    /// Number of vault wallets to use (active first)
    #[arg(short, long, default_value = "1")]
    wallets: usize,

    /// Override execution.max_per_wallet
    #[arg(long)]
    max_per_wallet: Option<usize>,
}

impl DeployArgs {
    fn wallet_args(&self) -> WalletArgs {
        match &self.secrets_file {
            Some(path) => WalletArgs::SecretsFile(path.clone()),
            None => WalletArgs::Vault {
                count: self.wallets,
            },
        }
    }
}

#[derive(Subcommand)]
enum DeployAction {
    /// Show the plan, cost and time estimates without submitting
    Plan {
        #[command(flatten)]
        args: DeployArgs,
    },

    /// Run the batch
    Run {
        #[command(flatten)]
        args: DeployArgs,

        /// Plan and report without submitting
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// Write the batch result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("batch_deployer=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match DeployerConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Vault { action } => match action {
            VaultAction::Add {
                label,
                secret_file,
                activate,
            } => commands::vault_add(&config, &label, secret_file, activate),
            VaultAction::AddPhrase {
                label,
                index,
                activate,
            } => commands::vault_add_phrase(&config, &label, index, activate),
            VaultAction::List => commands::vault_list(&config),
            VaultAction::Remove { address, force } => {
                commands::vault_remove(&config, &address, force)
            }
            VaultAction::Rename { address, name } => {
                commands::vault_rename(&config, &address, &name)
            }
            VaultAction::Activate { address } => commands::vault_activate(&config, &address),
            VaultAction::Export {
                address,
                with_phrase,
            } => commands::vault_export(&config, &address, with_phrase),
            VaultAction::Import { path, activate } => {
                commands::vault_import(&config, &path, activate)
            }
            VaultAction::Backups => commands::vault_backups(&config),
        },
        Commands::Deploy { action } => match action {
            DeployAction::Plan { args } => {
                commands::deploy_plan(&config, &args.targets, args.wallet_args(), args.max_per_wallet)
                    .await
            }
            DeployAction::Run {
                args,
                dry_run,
                force,
                output,
            } => {
                commands::deploy_run(
                    &config,
                    &args.targets,
                    args.wallet_args(),
                    args.max_per_wallet,
                    dry_run,
                    force,
                    output,
                )
                .await
            }
        },
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
