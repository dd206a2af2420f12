//! Error types for wallet and keymanager operations.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{
    remote::ChannelError,
    types::{KeymanagerKind, PublicKey},
};

/// Coarse classification of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or corrupt wallet configuration. The user must fix the path
    /// or recreate the wallet.
    Config,
    /// Wrong password or corrupt ciphertext.
    Crypto,
    /// Invalid mnemonic or derivation input.
    Derivation,
    /// Remote signer handshake, timeout or rejection.
    Remote,
    /// Lock contention on an account or on the wallet directory.
    Concurrency,
    /// Operation is invalid for the bound keymanager kind.
    Unsupported,
    /// Operation is invalid in the current lifecycle state.
    State,
    /// Filesystem or serialization failure.
    Io,
}

/// Errors produced by the wallet, its keymanagers and the secret store.
///
/// Messages never include secret values.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no wallet found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("a wallet already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("wallet configuration at {} is corrupt: {reason}", .path.display())]
    CorruptConfig { path: PathBuf, reason: String },

    #[error("wrong password")]
    WrongPassword,

    #[error("password must be at least {min_len} characters")]
    WeakPassword { min_len: usize },

    #[error("corrupt encrypted data: {0}")]
    CorruptData(String),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("unsupported mnemonic entropy size: {0} bits")]
    UnsupportedEntropy(usize),

    #[error("account index {0} is outside the hardened derivation range")]
    InvalidAccountIndex(u32),

    #[error("wallet is locked")]
    Locked,

    #[error("wallet is closed")]
    Closed,

    #[error("unknown account {0}")]
    UnknownAccount(PublicKey),

    #[error("account {0} is busy with another signing request")]
    AccountBusy(PublicKey),

    #[error("wallet directory {} is in use by another process", .0.display())]
    WalletBusy(PathBuf),

    #[error("remote signer at {address} is unavailable: {source}")]
    RemoteUnavailable {
        address: String,
        #[source]
        source: ChannelError,
    },

    #[error(transparent)]
    Remote(#[from] ChannelError),

    #[error("{operation} is not supported by {kind} keymanagers")]
    UnsupportedOperation {
        operation: &'static str,
        kind: KeymanagerKind,
    },

    #[error("{field} cannot be configured on a {kind} wallet")]
    UnsupportedForKind {
        field: &'static str,
        kind: KeymanagerKind,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl WalletError {
    /// Wrap an I/O error with the operation and path that produced it.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        WalletError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::NotFound(_)
            | WalletError::AlreadyExists(_)
            | WalletError::CorruptConfig { .. } => ErrorKind::Config,
            WalletError::WrongPassword
            | WalletError::WeakPassword { .. }
            | WalletError::CorruptData(_) => ErrorKind::Crypto,
            WalletError::InvalidMnemonic(_)
            | WalletError::UnsupportedEntropy(_)
            | WalletError::InvalidAccountIndex(_) => ErrorKind::Derivation,
            WalletError::RemoteUnavailable { .. } | WalletError::Remote(_) => ErrorKind::Remote,
            WalletError::AccountBusy(_) | WalletError::WalletBusy(_) => ErrorKind::Concurrency,
            WalletError::UnsupportedOperation { .. } | WalletError::UnsupportedForKind { .. } => {
                ErrorKind::Unsupported
            }
            WalletError::Locked | WalletError::Closed | WalletError::UnknownAccount(_) => {
                ErrorKind::State
            }
            WalletError::Io { .. } | WalletError::Serialization(_) => ErrorKind::Io,
        }
    }

    /// Whether retrying with corrected input, or later, can succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Config | ErrorKind::Unsupported | ErrorKind::Io
        )
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

/// Result type for wallet operations.
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(WalletError::WrongPassword.kind(), ErrorKind::Crypto);
        assert_eq!(
            WalletError::InvalidMnemonic("bad checksum".into()).kind(),
            ErrorKind::Derivation
        );
        assert_eq!(
            WalletError::UnsupportedForKind {
                field: "remote-address",
                kind: KeymanagerKind::Direct
            }
            .kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            WalletError::AccountBusy(PublicKey::from_bytes([1; 32])).kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(
            WalletError::Remote(ChannelError::Timeout(std::time::Duration::from_secs(1))).kind(),
            ErrorKind::Remote
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(WalletError::WrongPassword.is_recoverable());
        assert!(WalletError::AccountBusy(PublicKey::from_bytes([2; 32])).is_recoverable());
        assert!(!WalletError::NotFound(PathBuf::from("/tmp/none")).is_recoverable());
        assert!(!WalletError::UnsupportedOperation {
            operation: "create_account",
            kind: KeymanagerKind::Remote
        }
        .is_recoverable());
    }

    #[test]
    fn test_messages_name_context() {
        let err = WalletError::io(
            "reading /tmp/w/wallet.toml",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "reading /tmp/w/wallet.toml: denied");

        let err = WalletError::UnsupportedForKind {
            field: "remote-cert",
            kind: KeymanagerKind::Derived,
        };
        assert_eq!(
            err.to_string(),
            "remote-cert cannot be configured on a derived wallet"
        );
    }
}
