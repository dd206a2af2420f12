//! Validator Wallet
//!
//! Creates, persists, unlocks and operates the signing keys a validator
//! uses for attestations and proposals. Three custody models share one
//! keymanager contract:
//!
//! - **Direct**: locally generated keys, each sealed in its own keystore
//! - **Derived**: keys derived from a BIP39 mnemonic and an account index
//! - **Remote**: signing delegated to an external signer over mutual TLS
//!
//! ## Security Model
//!
//! - No secret is ever written to disk unencrypted
//! - Passwords, phrases, seeds and keys zeroize on drop and never appear in
//!   logs, errors or `Debug` output
//! - Signing for one account is serialized so conflicting duties cannot be
//!   signed concurrently
//! - One process at a time owns a wallet directory

pub mod config;
pub mod derivation;
pub mod error;
pub mod keymanager;
pub mod keystore;
pub mod remote;
pub mod secmem;
pub mod secret_store;
pub mod types;
pub mod wallet;

pub use config::{ConfigEdit, WalletConfig, WalletOptions};
pub use derivation::RecoveryPhrase;
pub use error::{ErrorKind, WalletError, WalletResult};
pub use keymanager::{AnyKeymanager, Keymanager};
pub use remote::{ChannelError, RemoteChannel, RemoteIdentity};
pub use secret_store::{KdfParams, Password};
pub use types::{KeymanagerKind, PublicKey, Signature, SigningRoot};
pub use wallet::{KeymanagerParams, Wallet, WalletState};
