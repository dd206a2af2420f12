//! Keymanagers
//!
//! Three custody models behind one capability trait:
//! - [`DirectKeymanager`]: encrypted keys generated and stored locally
//! - [`DerivedKeymanager`]: keys derived from one sealed mnemonic seed
//! - [`RemoteKeymanager`]: signing delegated to a remote signer over mTLS
//!
//! [`AnyKeymanager`] is the closed set the wallet hands out to runtime
//! callers.
//!
//! Each keymanager guards its in-memory session with a wallet-wide
//! read/write lock (readers: sign, list; writers: unlock, lock, create,
//! delete, reconfigure) and serializes signing per account through
//! [`AccountLocks`]. Signers always take the account lock first.

mod derived;
mod direct;
mod locks;
mod remote;

use async_trait::async_trait;

pub use derived::DerivedKeymanager;
pub use direct::DirectKeymanager;
pub use locks::{AccountGuard, AccountLocks};
pub use remote::RemoteKeymanager;

use crate::{
    error::WalletResult,
    types::{KeymanagerKind, PublicKey, Signature, SigningRoot},
};

/// Operations every keymanager supports, whatever its custody model.
#[async_trait]
pub trait Keymanager: Send + Sync {
    fn kind(&self) -> KeymanagerKind;

    /// Public keys of all accounts, in creation order.
    async fn list_accounts(&self) -> WalletResult<Vec<PublicKey>>;

    /// Sign `root` with the key for `public_key`.
    async fn sign(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature>;

    /// Add an account and return its public key.
    async fn create_account(&self) -> WalletResult<PublicKey>;

    /// Remove an account's local key material.
    async fn delete_account(&self, public_key: &PublicKey) -> WalletResult<()>;
}

/// The keymanager bound to a wallet.
#[derive(Debug)]
pub enum AnyKeymanager {
    Direct(DirectKeymanager),
    Derived(DerivedKeymanager),
    Remote(RemoteKeymanager),
}

impl AnyKeymanager {
    /// Drop decrypted keys or the remote channel.
    pub async fn lock(&self) {
        match self {
            AnyKeymanager::Direct(km) => km.lock().await,
            AnyKeymanager::Derived(km) => km.lock().await,
            AnyKeymanager::Remote(km) => km.lock().await,
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        match self {
            AnyKeymanager::Direct(km) => km.is_unlocked().await,
            AnyKeymanager::Derived(km) => km.is_unlocked().await,
            AnyKeymanager::Remote(km) => km.is_unlocked().await,
        }
    }
}

#[async_trait]
impl Keymanager for AnyKeymanager {
    fn kind(&self) -> KeymanagerKind {
        match self {
            AnyKeymanager::Direct(km) => km.kind(),
            AnyKeymanager::Derived(km) => km.kind(),
            AnyKeymanager::Remote(km) => km.kind(),
        }
    }

    async fn list_accounts(&self) -> WalletResult<Vec<PublicKey>> {
        match self {
            AnyKeymanager::Direct(km) => km.list_accounts().await,
            AnyKeymanager::Derived(km) => km.list_accounts().await,
            AnyKeymanager::Remote(km) => km.list_accounts().await,
        }
    }

    async fn sign(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        match self {
            AnyKeymanager::Direct(km) => km.sign(public_key, root).await,
            AnyKeymanager::Derived(km) => km.sign(public_key, root).await,
            AnyKeymanager::Remote(km) => km.sign(public_key, root).await,
        }
    }

    async fn create_account(&self) -> WalletResult<PublicKey> {
        match self {
            AnyKeymanager::Direct(km) => km.create_account().await,
            AnyKeymanager::Derived(km) => km.create_account().await,
            AnyKeymanager::Remote(km) => km.create_account().await,
        }
    }

    async fn delete_account(&self, public_key: &PublicKey) -> WalletResult<()> {
        match self {
            AnyKeymanager::Direct(km) => km.delete_account(public_key).await,
            AnyKeymanager::Derived(km) => km.delete_account(public_key).await,
            AnyKeymanager::Remote(km) => km.delete_account(public_key).await,
        }
    }
}
