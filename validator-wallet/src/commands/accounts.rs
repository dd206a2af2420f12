//! Account listing and creation commands

use std::path::Path;

use anyhow::{Context, Result};
use validator_wallet::{Keymanager, KeymanagerKind, Wallet};

use super::{existing_password, print_success, wallet_options};

/// List the wallet's account public keys
pub async fn list(wallet_dir: &Path) -> Result<()> {
    let mut wallet = Wallet::open(wallet_dir, wallet_options())
        .with_context(|| format!("opening wallet at {}", wallet_dir.display()))?;

    // Remote accounts live on the signer and need the channel
    if wallet.kind() == KeymanagerKind::Remote {
        wallet.unlock(None).await?;
    }
    let accounts = wallet.keymanager().list_accounts().await?;
    wallet.close().await;

    if accounts.is_empty() {
        println!("No accounts");
        return Ok(());
    }
    println!("{} account(s) in {} wallet:", accounts.len(), wallet.kind());
    for account in accounts {
        println!("  {}", account);
    }
    Ok(())
}

/// Add one account
pub async fn create(wallet_dir: &Path, password_file: Option<&Path>) -> Result<()> {
    let mut wallet = Wallet::open(wallet_dir, wallet_options())
        .with_context(|| format!("opening wallet at {}", wallet_dir.display()))?;

    let password = match wallet.kind() {
        KeymanagerKind::Remote => None,
        _ => Some(existing_password(password_file)?),
    };
    wallet.unlock(password.as_ref()).await?;

    let account = wallet.keymanager().create_account().await;
    wallet.close().await;

    print_success(&format!("Created account {}", account?));
    Ok(())
}
