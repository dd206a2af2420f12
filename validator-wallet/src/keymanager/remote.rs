use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{locks::AccountLocks, Keymanager};
use crate::{
    error::{WalletError, WalletResult},
    remote::{RemoteChannel, RemoteIdentity},
    types::{KeymanagerKind, PublicKey, Signature, SigningRoot},
};

struct RemoteState {
    identity: RemoteIdentity,
    timeout: Duration,
    /// Present while unlocked
    channel: Option<Arc<RemoteChannel>>,
}

/// Keymanager that forwards signing to a remote signer. Holds no private
/// keys; account creation and deletion happen on the signer.
pub struct RemoteKeymanager {
    state: RwLock<RemoteState>,
    /// Last key list reported by the signer
    known_accounts: Mutex<Option<Vec<PublicKey>>>,
    account_locks: AccountLocks,
}

impl RemoteKeymanager {
    pub fn new(identity: RemoteIdentity, timeout: Duration, account_lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(RemoteState {
                identity,
                timeout,
                channel: None,
            }),
            known_accounts: Mutex::new(None),
            account_locks: AccountLocks::new(account_lock_timeout),
        }
    }

    /// Load and validate the TLS identity. Connecting is deferred to the
    /// first request.
    pub async fn unlock(&self) -> WalletResult<()> {
        let mut state = self.state.write().await;
        let channel = RemoteChannel::open(&state.identity, state.timeout)?;
        state.channel = Some(Arc::new(channel));
        *self.known_accounts.lock() = None;
        info!("remote keymanager ready for signer {}", state.identity.address);
        Ok(())
    }

    pub async fn lock(&self) {
        let mut state = self.state.write().await;
        if state.channel.take().is_some() {
            debug!("remote keymanager locked, channel to {} dropped", state.identity.address);
        }
        *self.known_accounts.lock() = None;
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.read().await.channel.is_some()
    }

    pub async fn identity(&self) -> RemoteIdentity {
        self.state.read().await.identity.clone()
    }

    /// Swap in a new identity. When unlocked, the new identity must load
    /// before it replaces the old channel.
    pub async fn reconfigure(&self, identity: RemoteIdentity, timeout: Duration) -> WalletResult<()> {
        let mut state = self.state.write().await;
        if state.channel.is_some() {
            let channel = RemoteChannel::open(&identity, timeout)?;
            state.channel = Some(Arc::new(channel));
        }
        info!(
            "remote signer reconfigured: {} -> {}",
            state.identity.address, identity.address
        );
        state.identity = identity;
        state.timeout = timeout;
        *self.known_accounts.lock() = None;
        Ok(())
    }

    /// Round trip to the signer.
    pub async fn ping(&self) -> WalletResult<()> {
        let channel = self.channel().await?;
        channel.ping().await
    }

    async fn channel(&self) -> WalletResult<Arc<RemoteChannel>> {
        self.state
            .read()
            .await
            .channel
            .clone()
            .ok_or(WalletError::Locked)
    }

    async fn refresh_accounts(&self, channel: &RemoteChannel) -> WalletResult<Vec<PublicKey>> {
        let keys = channel.list_public_keys().await?;
        *self.known_accounts.lock() = Some(keys.clone());
        Ok(keys)
    }

    async fn sign_unlocked(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        let state = self.state.read().await;
        let channel = state.channel.as_ref().ok_or(WalletError::Locked)?;

        // A key the signer has not reported yet may have been added since
        // the last listing, so refresh once before giving up on it.
        if self.is_known(public_key) != Some(true)
            && !self.refresh_accounts(channel).await?.contains(public_key)
        {
            return Err(WalletError::UnknownAccount(*public_key));
        }

        debug!(
            "requesting signature for {} from {}",
            public_key.short(),
            channel.address()
        );
        channel.request_signature(public_key, root).await
    }

    fn is_known(&self, public_key: &PublicKey) -> Option<bool> {
        self.known_accounts
            .lock()
            .as_ref()
            .map(|keys| keys.contains(public_key))
    }
}

#[async_trait]
impl Keymanager for RemoteKeymanager {
    fn kind(&self) -> KeymanagerKind {
        KeymanagerKind::Remote
    }

    async fn list_accounts(&self) -> WalletResult<Vec<PublicKey>> {
        let state = self.state.read().await;
        let channel = state.channel.as_ref().ok_or(WalletError::Locked)?;
        self.refresh_accounts(channel).await
    }

    async fn sign(&self, public_key: &PublicKey, root: &SigningRoot) -> WalletResult<Signature> {
        self.account_locks
            .serialize(public_key, self.sign_unlocked(public_key, root))
            .await
    }

    async fn create_account(&self) -> WalletResult<PublicKey> {
        Err(WalletError::UnsupportedOperation {
            operation: "create_account",
            kind: KeymanagerKind::Remote,
        })
    }

    async fn delete_account(&self, _public_key: &PublicKey) -> WalletResult<()> {
        Err(WalletError::UnsupportedOperation {
            operation: "delete_account",
            kind: KeymanagerKind::Remote,
        })
    }
}

impl fmt::Debug for RemoteKeymanager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteKeymanager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keymanager() -> RemoteKeymanager {
        RemoteKeymanager::new(
            RemoteIdentity::new(
                "127.0.0.1:1",
                "/nonexistent/client.pem",
                "/nonexistent/client.key",
                "/nonexistent/ca.pem",
            ),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_local_mutations_unsupported() {
        let km = keymanager();
        assert!(matches!(
            km.create_account().await,
            Err(WalletError::UnsupportedOperation {
                kind: KeymanagerKind::Remote,
                ..
            })
        ));
        assert!(matches!(
            km.delete_account(&PublicKey::from_bytes([1; 32])).await,
            Err(WalletError::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_locked_until_identity_loads() {
        let km = keymanager();
        assert!(matches!(km.list_accounts().await, Err(WalletError::Locked)));
        assert!(matches!(
            km.sign(&PublicKey::from_bytes([1; 32]), &SigningRoot::new([0; 32]))
                .await,
            Err(WalletError::Locked)
        ));

        // Missing PEM files fail the unlock and leave the keymanager locked
        assert!(matches!(
            km.unlock().await,
            Err(WalletError::Remote(crate::remote::ChannelError::InvalidIdentity(_)))
        ));
        assert!(!km.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_reconfigure_while_locked() {
        let km = keymanager();
        let identity = RemoteIdentity::new("10.0.0.2:9000", "c.pem", "k.pem", "ca.pem");
        km.reconfigure(identity.clone(), Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(km.identity().await, identity);
    }
}
