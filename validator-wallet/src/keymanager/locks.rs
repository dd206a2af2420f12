//! Per-account signing locks.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    error::{WalletError, WalletResult},
    types::PublicKey,
};

/// One async mutex per account public key.
///
/// Signing for one account is serialized while different accounts proceed
/// in parallel. The guard is owned, so dropping a cancelled sign future
/// releases the account.
#[derive(Debug)]
pub struct AccountLocks {
    locks: Mutex<HashMap<PublicKey, Arc<AsyncMutex<()>>>>,
    wait: Duration,
}

pub type AccountGuard = OwnedMutexGuard<()>;

impl AccountLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// Wait up to the configured bound for exclusive use of `public_key`.
    pub async fn acquire(&self, public_key: &PublicKey) -> WalletResult<AccountGuard> {
        let lock = self
            .locks
            .lock()
            .entry(*public_key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        tokio::time::timeout(self.wait, lock.lock_owned())
            .await
            .map_err(|_| WalletError::AccountBusy(*public_key))
    }

    /// Run `op` while holding the account lock. Keys the keymanager turns
    /// out not to own leave no entry behind.
    pub async fn serialize<T>(
        &self,
        public_key: &PublicKey,
        op: impl Future<Output = WalletResult<T>>,
    ) -> WalletResult<T> {
        let guard = self.acquire(public_key).await?;
        let result = op.await;
        drop(guard);

        if matches!(result, Err(WalletError::UnknownAccount(_))) {
            self.discard_if_idle(public_key);
        }
        result
    }

    /// Drop the lock entry of a deleted account.
    pub fn forget(&self, public_key: &PublicKey) {
        self.locks.lock().remove(public_key);
    }

    /// Remove the entry for `public_key` unless someone holds or awaits it.
    fn discard_if_idle(&self, public_key: &PublicKey) {
        let mut locks = self.locks.lock();
        if locks
            .get(public_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(public_key);
        }
    }

    /// Number of accounts with a lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
