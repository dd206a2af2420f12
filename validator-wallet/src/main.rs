//! Validator Wallet CLI
//!
//! Operator commands for creating, reconfiguring and recovering validator
//! wallets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator_wallet::KeymanagerKind;

mod commands;

use commands::RemoteFlags;

#[derive(Parser)]
#[command(name = "validator-wallet")]
#[command(about = "Validator wallet - manage validator signing keys")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, reconfigure or recover a wallet
    Wallet {
        #[command(subcommand)]
        command: WalletCommand,
    },

    /// Inspect or add accounts
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Create a new wallet
    Create {
        /// Wallet directory (default: ~/.validator-wallet)
        #[arg(long)]
        wallet_dir: Option<PathBuf>,

        /// Custody model: direct, derived or remote
        #[arg(long, default_value = "derived")]
        keymanager_kind: KeymanagerKind,

        /// File holding the new wallet password
        #[arg(long)]
        password_file: Option<PathBuf>,

        #[command(flatten)]
        remote: RemoteFlags,

        /// Mnemonic entropy for derived wallets (128, 160, 192, 224 or 256)
        #[arg(long, default_value_t = 256)]
        entropy_bits: usize,

        /// Write the recovery phrase to this file instead of the terminal
        #[arg(long)]
        mnemonic_output_file: Option<PathBuf>,
    },

    /// Change the remote signer settings of a wallet
    EditConfig {
        /// Wallet directory (default: ~/.validator-wallet)
        #[arg(long)]
        wallet_dir: Option<PathBuf>,

        /// File holding the wallet password
        #[arg(long)]
        password_file: Option<PathBuf>,

        #[command(flatten)]
        remote: RemoteFlags,

        /// Remote signer round-trip timeout in milliseconds
        #[arg(long)]
        remote_timeout_ms: Option<u64>,
    },

    /// Rebuild a derived wallet from its recovery phrase
    Recover {
        /// Directory for the recovered wallet (default: ~/.validator-wallet)
        #[arg(long)]
        wallet_dir: Option<PathBuf>,

        /// File holding the recovery phrase
        #[arg(long)]
        mnemonic_file: PathBuf,

        /// File holding the new wallet password
        #[arg(long)]
        password_file: Option<PathBuf>,

        /// Number of accounts to re-derive
        #[arg(long, default_value_t = 1)]
        num_accounts: u32,
    },
}

#[derive(Subcommand)]
enum AccountsCommand {
    /// List account public keys
    List {
        /// Wallet directory (default: ~/.validator-wallet)
        #[arg(long)]
        wallet_dir: Option<PathBuf>,
    },

    /// Add an account to a direct or derived wallet
    Create {
        /// Wallet directory (default: ~/.validator-wallet)
        #[arg(long)]
        wallet_dir: Option<PathBuf>,

        /// File holding the wallet password
        #[arg(long)]
        password_file: Option<PathBuf>,
    },
}

fn wallet_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(dirs::home_dir()
            .context("could not find home directory, pass --wallet-dir")?
            .join(".validator-wallet")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Wallet { command } => match command {
            WalletCommand::Create {
                wallet_dir: dir,
                keymanager_kind,
                password_file,
                remote,
                entropy_bits,
                mnemonic_output_file,
            } => {
                commands::create::run(
                    &wallet_dir(dir)?,
                    keymanager_kind,
                    password_file.as_deref(),
                    remote,
                    entropy_bits,
                    mnemonic_output_file.as_deref(),
                )
                .await
            }
            WalletCommand::EditConfig {
                wallet_dir: dir,
                password_file,
                remote,
                remote_timeout_ms,
            } => {
                commands::edit_config::run(
                    &wallet_dir(dir)?,
                    password_file.as_deref(),
                    remote,
                    remote_timeout_ms,
                )
                .await
            }
            WalletCommand::Recover {
                wallet_dir: dir,
                mnemonic_file,
                password_file,
                num_accounts,
            } => {
                commands::recover::run(
                    &wallet_dir(dir)?,
                    &mnemonic_file,
                    password_file.as_deref(),
                    num_accounts,
                )
                .await
            }
        },
        Commands::Accounts { command } => match command {
            AccountsCommand::List { wallet_dir: dir } => {
                commands::accounts::list(&wallet_dir(dir)?).await
            }
            AccountsCommand::Create {
                wallet_dir: dir,
                password_file,
            } => commands::accounts::create(&wallet_dir(dir)?, password_file.as_deref()).await,
        },
    }
}
