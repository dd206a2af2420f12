//! Wallet creation command

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use anyhow::{bail, Context, Result};
use validator_wallet::{KeymanagerKind, KeymanagerParams, RecoveryPhrase, Wallet};

use super::{new_password, print_error, print_success, print_warning, wallet_options, RemoteFlags};

/// Run the create command
pub async fn run(
    wallet_dir: &Path,
    kind: KeymanagerKind,
    password_file: Option<&Path>,
    remote: RemoteFlags,
    entropy_bits: usize,
    mnemonic_output_file: Option<&Path>,
) -> Result<()> {
    if kind != KeymanagerKind::Remote {
        if let Some(flag) = remote.first_set() {
            bail!("--{} only applies to remote wallets", flag);
        }
    }

    // Claimed before anything is persisted
    let mut phrase_file = match (kind, mnemonic_output_file) {
        (KeymanagerKind::Derived, Some(path)) => Some((path, create_phrase_file(path)?)),
        (_, Some(_)) => bail!("--mnemonic-output-file only applies to derived wallets"),
        (_, None) => None,
    };

    let params = match kind {
        KeymanagerKind::Direct => KeymanagerParams::Direct {
            password: new_password(password_file)?,
        },
        KeymanagerKind::Derived => KeymanagerParams::Derived {
            password: new_password(password_file)?,
            entropy_bits,
            passphrase: String::new(),
        },
        KeymanagerKind::Remote => KeymanagerParams::Remote {
            identity: remote.into_identity()?,
        },
    };

    let (mut wallet, phrase) = match Wallet::create(wallet_dir, params, wallet_options()) {
        Ok(created) => created,
        Err(e) => {
            if let Some((path, file)) = phrase_file.take() {
                drop(file);
                let _ = fs::remove_file(path);
            }
            return Err(e)
                .with_context(|| format!("creating {} wallet at {}", kind, wallet_dir.display()));
        }
    };

    println!();
    print_success("Wallet created successfully!");
    println!("Wallet saved to: {}", wallet_dir.display());

    if let Some(phrase) = phrase {
        match phrase_file {
            Some((path, mut file)) => match write_phrase(&mut file, &phrase) {
                Ok(()) => println!("Recovery phrase written to: {}", path.display()),
                Err(e) => {
                    print_error(&format!(
                        "Could not write recovery phrase to {}: {}",
                        path.display(),
                        e
                    ));
                    display_phrase(&phrase);
                }
            },
            None => display_phrase(&phrase),
        }
        println!();
        print_warning("IMPORTANT: Store your recovery phrase safely and offline!");
        print_warning("Anyone with this phrase can sign as your validators.");
        print_warning("If you lose it, you cannot recover your wallet.");
    }

    wallet.close().await;
    Ok(())
}

fn display_phrase(phrase: &RecoveryPhrase) {
    let words = phrase.words();

    println!();
    println!("Your recovery phrase ({} words):", words.len());
    println!();

    // Display in 4 columns
    for (i, word) in words.iter().enumerate() {
        print!("{:>2}. {:<12}", i + 1, word);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    println!();
}

/// Create a new file only the owner can read. Refuses an existing file.
fn create_phrase_file(path: &Path) -> Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
        .open(path)
        .with_context(|| format!("creating mnemonic file {}", path.display()))
}

fn write_phrase(file: &mut File, phrase: &RecoveryPhrase) -> std::io::Result<()> {
    file.write_all(phrase.as_str().as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()
}
