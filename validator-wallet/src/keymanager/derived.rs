use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{locks::AccountLocks, Keymanager};
use crate::{
    derivation::{self, Seed},
    error::{WalletError, WalletResult},
    keystore::{DerivedAccount, DerivedAccounts, DerivedKeystore, StagedWrites},
    secret_store::{KdfParams, Password},
    types::{KeymanagerKind, PublicKey, Signature, SigningRoot},
};

struct DerivedSession {
    seed: Seed,
    keys: HashMap<PublicKey, SigningKey>,
}

/// Keymanager whose accounts are re-derived from one sealed seed.
///
/// Only the seed is encrypted on disk; `accounts.json` links each public
/// key to its derivation index.
pub struct DerivedKeymanager {
    keystore: DerivedKeystore,
    kdf: KdfParams,
    session: RwLock<Option<DerivedSession>>,
    account_locks: AccountLocks,
}

impl DerivedKeymanager {
    pub fn new(keystore: DerivedKeystore, kdf: KdfParams, account_lock_timeout: Duration) -> Self {
        Self {
            keystore,
            kdf,
            session: RwLock::new(None),
            account_locks: AccountLocks::new(account_lock_timeout),
        }
    }

    /// Seal `seed` and record accounts `0..num_accounts`.
    pub fn initialize(
        keystore: &DerivedKeystore,
        seed: &Seed,
        password: &Password,
        kdf: &KdfParams,
        num_accounts: u32,
    ) -> WalletResult<Vec<PublicKey>> {
        let mut accounts = DerivedAccounts::default();
        for index in 0..num_accounts {
            let (_, public_key) = derivation::derive_key(seed, index)?;
            accounts.accounts.push(DerivedAccount { index, public_key });
        }
        accounts.next_index = num_accounts;

        keystore.store_seed(seed, password, kdf)?;
        keystore.save_accounts(&accounts)?;
        Ok(accounts.accounts.into_iter().map(|a| a.public_key).collect())
    }

    /// Open the seed and re-derive every recorded account, checking each
    /// against its recorded public key.
    pub async fn unlock(&self, password: &Password) -> WalletResult<usize> {
        let mut session = self.session.write().await;

        let seed = self.keystore.open_seed(password)?;
        let mut keys = HashMap::new();
        for account in self.keystore.load_accounts()?.accounts {
            let (key, public_key) = derivation::derive_key(&seed, account.index)?;
            if public_key != account.public_key {
                return Err(WalletError::CorruptData(format!(
                    "account {} does not match derivation index {}",
                    account.public_key, account.index
                )));
            }
            keys.insert(public_key, key);
        }

        let count = keys.len();
        *session = Some(DerivedSession { seed, keys });
        info!("unlocked {} derived account(s)", count);
        Ok(count)
    }

    pub async fn lock(&self) {
        if self.session.write().await.take().is_some() {
            debug!("derived keymanager locked, seed dropped");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Reseal the seed under `new`, committed together with whatever the
    /// caller already staged.
    pub async fn change_password(
        &self,
        old: &Password,
        new: &Password,
        mut staged: StagedWrites,
    ) -> WalletResult<()> {
        let _session = self.session.write().await;
        let seed = self.keystore.open_seed(old)?;
        self.keystore.stage_seed(&seed, new, &self.kdf, &mut staged)?;
        staged.commit()?;
        info!("resealed derived seed under the new password");
        Ok(())
    }

    async fn sign_unlocked(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(WalletError::Locked)?;

        let key = session
            .keys
            .get(public_key)
            .ok_or(WalletError::UnknownAccount(*public_key))?;
        debug!("signing with derived account {}", public_key.short());
        Ok(key.sign(root.as_bytes()).into())
    }
}

#[async_trait]
impl Keymanager for DerivedKeymanager {
    fn kind(&self) -> KeymanagerKind {
        KeymanagerKind::Derived
    }

    async fn list_accounts(&self) -> WalletResult<Vec<PublicKey>> {
        let _session = self.session.read().await;
        let mut accounts = self.keystore.load_accounts()?.accounts;
        accounts.sort_by_key(|account| account.index);
        Ok(accounts.into_iter().map(|a| a.public_key).collect())
    }

    async fn sign(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        self.account_locks
            .serialize(public_key, self.sign_unlocked(public_key, root))
            .await
    }

    /// Derive the next unused index. Indices of deleted accounts are never
    /// handed out again.
    async fn create_account(&self) -> WalletResult<PublicKey> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(WalletError::Locked)?;

        let mut accounts = self.keystore.load_accounts()?;
        let index = accounts.next_index;
        let (key, public_key) = derivation::derive_key(&session.seed, index)?;
        accounts.accounts.push(DerivedAccount { index, public_key });
        accounts.next_index = index
            .checked_add(1)
            .ok_or(WalletError::InvalidAccountIndex(index))?;
        self.keystore.save_accounts(&accounts)?;

        session.keys.insert(public_key, key);
        info!("created derived account {} at index {}", public_key.short(), index);
        Ok(public_key)
    }

    async fn delete_account(&self, public_key: &PublicKey) -> WalletResult<()> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(WalletError::Locked)?;

        let mut accounts = self.keystore.load_accounts()?;
        let index = accounts
            .index_of(public_key)
            .ok_or(WalletError::UnknownAccount(*public_key))?;
        accounts.accounts.retain(|account| account.index != index);
        self.keystore.save_accounts(&accounts)?;

        session.keys.remove(public_key);
        self.account_locks.forget(public_key);
        info!("deleted derived account {} (index {})", public_key.short(), index);
        Ok(())
    }
}

impl fmt::Debug for DerivedKeymanager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeymanager")
            .field("keystore", &self.keystore.dir())
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}
