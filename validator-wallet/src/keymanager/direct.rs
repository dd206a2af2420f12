use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{locks::AccountLocks, Keymanager};
use crate::{
    error::{WalletError, WalletResult},
    keystore::{DirectKeystore, KeystoreFile, StagedWrites},
    secret_store::{KdfParams, Password},
    types::{KeymanagerKind, PublicKey, Signature, SigningRoot},
};

/// Decrypted state held between unlock and lock. Keys zeroize on drop.
struct DirectSession {
    password: Password,
    keys: HashMap<PublicKey, SigningKey>,
}

/// Keymanager for independently generated keys, one keystore file each.
pub struct DirectKeymanager {
    keystore: DirectKeystore,
    kdf: KdfParams,
    session: RwLock<Option<DirectSession>>,
    account_locks: AccountLocks,
}

impl DirectKeymanager {
    pub fn new(keystore: DirectKeystore, kdf: KdfParams, account_lock_timeout: Duration) -> Self {
        Self {
            keystore,
            kdf,
            session: RwLock::new(None),
            account_locks: AccountLocks::new(account_lock_timeout),
        }
    }

    /// Decrypt every keystore with `password`. Nothing is kept if any
    /// keystore fails to open.
    pub async fn unlock(&self, password: &Password) -> WalletResult<usize> {
        let mut session = self.session.write().await;

        let mut keys = HashMap::new();
        for file in self.keystore.load_all()? {
            let key = file.open(password)?;
            keys.insert(file.public_key, key);
        }

        let count = keys.len();
        *session = Some(DirectSession {
            password: password.clone(),
            keys,
        });
        info!("unlocked {} direct account(s)", count);
        Ok(count)
    }

    pub async fn lock(&self) {
        if self.session.write().await.take().is_some() {
            debug!("direct keymanager locked, decrypted keys dropped");
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Reseal every keystore under `new` and commit them together with
    /// whatever the caller already staged. All keystores are opened before
    /// anything is written, so a wrong `old` password changes nothing, and
    /// no file is replaced unless every replacement was staged.
    pub async fn change_password(
        &self,
        old: &Password,
        new: &Password,
        mut staged: StagedWrites,
    ) -> WalletResult<()> {
        let mut session = self.session.write().await;

        let opened = self
            .keystore
            .load_all()?
            .into_iter()
            .map(|file| file.open(old).map(|key| (file.created_at, key)))
            .collect::<WalletResult<Vec<_>>>()?;

        for (created_at, key) in &opened {
            let mut resealed = KeystoreFile::seal(key, new, &self.kdf)?;
            resealed.created_at = *created_at;
            self.keystore.stage(&resealed, &mut staged)?;
        }
        staged.commit()?;

        if let Some(session) = session.as_mut() {
            session.password = new.clone();
        }
        info!("resealed {} direct keystore(s) under the new password", opened.len());
        Ok(())
    }

    /// Sign once the account lock is held.
    async fn sign_unlocked(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(WalletError::Locked)?;

        let key = session
            .keys
            .get(public_key)
            .ok_or(WalletError::UnknownAccount(*public_key))?;
        debug!("signing with direct account {}", public_key.short());
        Ok(key.sign(root.as_bytes()).into())
    }
}

#[async_trait]
impl Keymanager for DirectKeymanager {
    fn kind(&self) -> KeymanagerKind {
        KeymanagerKind::Direct
    }

    async fn list_accounts(&self) -> WalletResult<Vec<PublicKey>> {
        let _session = self.session.read().await;
        self.keystore.public_keys()
    }

    async fn sign(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        self.account_locks
            .serialize(public_key, self.sign_unlocked(public_key, root))
            .await
    }

    async fn create_account(&self) -> WalletResult<PublicKey> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(WalletError::Locked)?;

        let key = SigningKey::generate(&mut OsRng);
        let public_key = self.keystore.store(&key, &session.password, &self.kdf)?;
        session.keys.insert(public_key, key);
        info!("created direct account {}", public_key.short());
        Ok(public_key)
    }

    async fn delete_account(&self, public_key: &PublicKey) -> WalletResult<()> {
        let mut guard = self.session.write().await;
        let session = guard.as_mut().ok_or(WalletError::Locked)?;

        self.keystore.remove(public_key)?;
        session.keys.remove(public_key);
        self.account_locks.forget(public_key);
        info!("deleted direct account {}", public_key.short());
        Ok(())
    }
}

impl fmt::Debug for DirectKeymanager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectKeymanager")
            .field("keystore", &self.keystore.dir())
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FAST: KdfParams = KdfParams::new(8, 1, 1);

    fn keymanager(temp_dir: &TempDir) -> DirectKeymanager {
        DirectKeymanager::new(
            DirectKeystore::new(temp_dir.path().join("direct")),
            FAST,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_sign_requires_unlock() {
        let temp_dir = TempDir::new().unwrap();
        let km = keymanager(&temp_dir);
        let password = Password::new("direct-password");

        km.unlock(&password).await.unwrap();
        let account = km.create_account().await.unwrap();
        let root = SigningRoot::new([7; 32]);
        let signature = km.sign(&account, &root).await.unwrap();
        assert!(account.verify(&root, &signature));

        km.lock().await;
        assert!(matches!(
            km.sign(&account, &root).await,
            Err(WalletError::Locked)
        ));

        // Public keys stay listable while locked
        assert_eq!(km.list_accounts().await.unwrap(), vec![account]);
    }

    #[tokio::test]
    async fn test_unlock_with_wrong_password() {
        let temp_dir = TempDir::new().unwrap();
        let km = keymanager(&temp_dir);
        km.unlock(&Password::new("direct-password")).await.unwrap();
        km.create_account().await.unwrap();
        km.lock().await;

        assert!(matches!(
            km.unlock(&Password::new("other-password")).await,
            Err(WalletError::WrongPassword)
        ));
        assert!(!km.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let temp_dir = TempDir::new().unwrap();
        let km = keymanager(&temp_dir);
        km.unlock(&Password::new("direct-password")).await.unwrap();

        let stranger = PublicKey::from_bytes([9; 32]);
        assert!(matches!(
            km.sign(&stranger, &SigningRoot::new([0; 32])).await,
            Err(WalletError::UnknownAccount(k)) if k == stranger
        ));
    }

    #[tokio::test]
    async fn test_delete_account() {
        let temp_dir = TempDir::new().unwrap();
        let km = keymanager(&temp_dir);
        km.unlock(&Password::new("direct-password")).await.unwrap();
        let first = km.create_account().await.unwrap();
        let second = km.create_account().await.unwrap();

        km.delete_account(&first).await.unwrap();
        assert_eq!(km.list_accounts().await.unwrap(), vec![second]);
        assert!(matches!(
            km.sign(&first, &SigningRoot::new([1; 32])).await,
            Err(WalletError::UnknownAccount(_))
        ));
        assert!(matches!(
            km.delete_account(&first).await,
            Err(WalletError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_require_unlock() {
        let temp_dir = TempDir::new().unwrap();
        let km = keymanager(&temp_dir);
        assert!(matches!(km.create_account().await, Err(WalletError::Locked)));
        assert!(matches!(
            km.delete_account(&PublicKey::from_bytes([1; 32])).await,
            Err(WalletError::Locked)
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let temp_dir = TempDir::new().unwrap();
        let km = keymanager(&temp_dir);
        let old = Password::new("direct-password");
        let new = Password::new("rotated-password");

        km.unlock(&old).await.unwrap();
        let account = km.create_account().await.unwrap();

        assert!(matches!(
            km.change_password(&new, &old, StagedWrites::new()).await,
            Err(WalletError::WrongPassword)
        ));
        km.change_password(&old, &new, StagedWrites::new())
            .await
            .unwrap();
        km.lock().await;

        assert!(km.unlock(&old).await.is_err());
        km.unlock(&new).await.unwrap();
        assert!(km.sign(&account, &SigningRoot::new([2; 32])).await.is_ok());
    }
}
