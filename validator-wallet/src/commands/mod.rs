//! CLI Commands
//!
//! Thin wrappers that collect operator input and call into the library.

pub mod accounts;
pub mod create;
pub mod edit_config;
pub mod recover;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use validator_wallet::{
    secret_store::MIN_PASSWORD_LEN, ConfigEdit, Password, RemoteIdentity, WalletOptions,
};
use zeroize::Zeroizing;

/// Remote signer flags shared by `create` and `edit-config`.
#[derive(Args, Debug, Default)]
pub struct RemoteFlags {
    /// Remote signer address (host:port)
    #[arg(long)]
    pub remote_address: Option<String>,

    /// Client certificate (PEM) presented to the remote signer
    #[arg(long)]
    pub remote_cert: Option<PathBuf>,

    /// Private key (PEM) for the client certificate
    #[arg(long)]
    pub remote_key: Option<PathBuf>,

    /// CA certificate (PEM) the remote signer's certificate must chain to
    #[arg(long)]
    pub remote_ca_cert: Option<PathBuf>,

    /// Name expected in the remote signer's certificate
    #[arg(long)]
    pub remote_server_name: Option<String>,
}

impl RemoteFlags {
    /// Name of the first flag that was passed, if any.
    pub fn first_set(&self) -> Option<&'static str> {
        self.as_edit(None).first_remote_field()
    }

    /// Full identity for a new remote wallet. Every path flag is required.
    pub fn into_identity(self) -> Result<RemoteIdentity> {
        let missing = |flag: &str| anyhow!("--{} is required for remote wallets", flag);
        let mut identity = RemoteIdentity::new(
            self.remote_address.ok_or_else(|| missing("remote-address"))?,
            self.remote_cert.ok_or_else(|| missing("remote-cert"))?,
            self.remote_key.ok_or_else(|| missing("remote-key"))?,
            self.remote_ca_cert.ok_or_else(|| missing("remote-ca-cert"))?,
        );
        identity.server_name = self.remote_server_name;
        Ok(identity)
    }

    pub fn as_edit(&self, remote_timeout_ms: Option<u64>) -> ConfigEdit {
        ConfigEdit {
            remote_address: self.remote_address.clone(),
            remote_cert: self.remote_cert.clone(),
            remote_key: self.remote_key.clone(),
            remote_ca_cert: self.remote_ca_cert.clone(),
            remote_server_name: self.remote_server_name.clone(),
            remote_timeout: remote_timeout_ms.map(std::time::Duration::from_millis),
        }
    }
}

/// Options for every CLI-opened wallet.
pub fn wallet_options() -> WalletOptions {
    WalletOptions::default().with_min_password_len(MIN_PASSWORD_LEN)
}

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<Password> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = Zeroizing::new(rpassword::read_password()?);
    Ok(Password::new(password.as_str()))
}

/// Read a password file, dropping the trailing newline.
pub fn read_password_file(path: &Path) -> Result<Password> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading password file {}", path.display()))?;
    Ok(Password::from_file_contents(contents))
}

/// Password for an existing wallet: from the file if given, else prompted.
pub fn existing_password(password_file: Option<&Path>) -> Result<Password> {
    match password_file {
        Some(path) => read_password_file(path),
        None => prompt_password("Enter wallet password: "),
    }
}

/// Password for a new wallet. Prompted passwords are asked twice.
pub fn new_password(password_file: Option<&Path>) -> Result<Password> {
    if let Some(path) = password_file {
        let password = read_password_file(path)?;
        password.ensure_strength(MIN_PASSWORD_LEN)?;
        return Ok(password);
    }

    loop {
        let password = prompt_password("Enter wallet password: ")?;

        if let Err(e) = password.ensure_strength(MIN_PASSWORD_LEN) {
            print_error(&e.to_string());
            continue;
        }

        let confirm = prompt_password("Confirm password: ")?;

        if password.expose() != confirm.expose() {
            print_error("Passwords do not match");
            continue;
        }

        return Ok(password);
    }
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_flags_require_all_paths() {
        let flags = RemoteFlags {
            remote_address: Some("signer:9000".to_string()),
            remote_cert: Some(PathBuf::from("client.pem")),
            ..Default::default()
        };
        assert_eq!(flags.first_set(), Some("remote-address"));
        let err = flags.into_identity().unwrap_err();
        assert!(err.to_string().contains("--remote-key"));
    }

    #[test]
    fn test_no_remote_flags() {
        assert_eq!(RemoteFlags::default().first_set(), None);
        assert!(RemoteFlags::default().as_edit(None).is_empty());
    }
}
