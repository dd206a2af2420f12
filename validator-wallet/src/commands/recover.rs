//! Wallet recovery command

use std::{fs, path::Path};

use anyhow::{Context, Result};
use validator_wallet::{Keymanager, Wallet};
use zeroize::Zeroizing;

use super::{new_password, print_success, wallet_options};

/// Run the recover command
pub async fn run(
    wallet_dir: &Path,
    mnemonic_file: &Path,
    password_file: Option<&Path>,
    num_accounts: u32,
) -> Result<()> {
    let phrase = Zeroizing::new(
        fs::read_to_string(mnemonic_file)
            .with_context(|| format!("reading mnemonic file {}", mnemonic_file.display()))?,
    );
    let password = new_password(password_file)?;

    let mut wallet = Wallet::recover(wallet_dir, &phrase, num_accounts, &password, wallet_options())
        .with_context(|| format!("recovering wallet into {}", wallet_dir.display()))?;

    let accounts = wallet.keymanager().list_accounts().await?;
    wallet.close().await;

    println!();
    print_success("Wallet recovered successfully!");
    println!("Wallet saved to: {}", wallet_dir.display());
    println!();
    println!("Recovered accounts:");
    for (index, account) in accounts.iter().enumerate() {
        println!("  {:>3}  {}", index, account);
    }
    Ok(())
}
