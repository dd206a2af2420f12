//! Wallet reconfiguration command

use std::path::Path;

use anyhow::{Context, Result};
use validator_wallet::{ChannelError, KeymanagerKind, Wallet, WalletError};

use super::{read_password_file, print_success, print_warning, wallet_options, RemoteFlags};

/// Run the edit-config command
pub async fn run(
    wallet_dir: &Path,
    password_file: Option<&Path>,
    remote: RemoteFlags,
    remote_timeout_ms: Option<u64>,
) -> Result<()> {
    let edit = remote.as_edit(remote_timeout_ms);
    if edit.is_empty() {
        print_warning("No configuration changes requested");
        return Ok(());
    }

    let mut wallet = Wallet::open(wallet_dir, wallet_options())
        .with_context(|| format!("opening wallet at {}", wallet_dir.display()))?;

    // Remote wallets unlock without a password. Local wallets have no
    // editable fields, so the edit below is refused before any unlock.
    let result = match (wallet.kind(), password_file) {
        (KeymanagerKind::Remote, _) => match wallet.unlock(None).await {
            Ok(()) => wallet.edit_config(edit).await,
            Err(e @ WalletError::Remote(
                ChannelError::InvalidIdentity(_) | ChannelError::CertificateExpired(_),
            )) => {
                print_warning(&format!("Stored remote identity is unusable: {}", e));
                wallet.unlock_with_edit(edit).await
            }
            Err(e) => Err(e),
        },
        (_, Some(path)) => {
            wallet.unlock(Some(&read_password_file(path)?)).await?;
            wallet.edit_config(edit).await
        }
        _ => wallet.edit_config(edit).await,
    };
    result.with_context(|| format!("editing configuration of {}", wallet_dir.display()))?;
    wallet.close().await;

    print_success("Wallet configuration updated");
    Ok(())
}
