//! Wallet lifecycle
//!
//! A wallet binds one keymanager kind to a storage directory for its whole
//! life:
//!
//! ```text
//! create/open/recover -> Created --unlock--> Unlocked --lock--> Locked
//!                                                   \--close--> Closed
//! ```
//!
//! The directory is held with an exclusive file lock from open until
//! close, so two processes never write the same keystore.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigEdit, RemoteSettings, WalletConfig, WalletOptions},
    derivation::{self, RecoveryPhrase},
    error::{WalletError, WalletResult},
    keymanager::{AnyKeymanager, DerivedKeymanager, DirectKeymanager, RemoteKeymanager},
    keystore::{DerivedKeystore, DirectKeystore, StagedWrites},
    remote::{RemoteChannel, RemoteIdentity},
    secret_store::Password,
    types::KeymanagerKind,
};

/// Exclusive process lock file inside the wallet directory
pub const LOCK_FILE: &str = ".wallet.lock";

/// Keystore subdirectory of direct wallets
pub const DIRECT_DIR: &str = "direct";

/// Keystore subdirectory of derived wallets
pub const DERIVED_DIR: &str = "derived";

/// Lifecycle state of an open wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletState {
    /// Opened or just created; keys are not available yet
    Created,
    Unlocked,
    Locked,
    /// Directory lock released; the handle is inert
    Closed,
}

/// Per-kind inputs to [`Wallet::create`].
pub enum KeymanagerParams {
    Direct {
        password: Password,
    },
    Derived {
        password: Password,
        entropy_bits: usize,
        /// Optional BIP39 passphrase; empty for none
        passphrase: String,
    },
    Remote {
        identity: RemoteIdentity,
    },
}

impl KeymanagerParams {
    pub fn kind(&self) -> KeymanagerKind {
        match self {
            KeymanagerParams::Direct { .. } => KeymanagerKind::Direct,
            KeymanagerParams::Derived { .. } => KeymanagerKind::Derived,
            KeymanagerParams::Remote { .. } => KeymanagerKind::Remote,
        }
    }
}

/// Exclusive advisory lock on a wallet directory, released on drop.
#[derive(Debug)]
struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> WalletResult<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| WalletError::io(format!("opening {}", path.display()), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired wallet lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(WalletError::WalletBusy(dir.to_path_buf()))
            }
            Err(e) => Err(WalletError::io(format!("locking {}", path.display()), e)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("failed to release wallet lock {}: {}", self.path.display(), e);
        }
    }
}

/// An open wallet.
pub struct Wallet {
    dir: PathBuf,
    config: WalletConfig,
    options: WalletOptions,
    state: WalletState,
    keymanager: Arc<AnyKeymanager>,
    dir_lock: Option<DirLock>,
}

impl Wallet {
    /// Create a wallet in `dir`. Derived wallets return their freshly
    /// generated recovery phrase, which the wallet never stores.
    pub fn create(
        dir: impl AsRef<Path>,
        params: KeymanagerParams,
        options: WalletOptions,
    ) -> WalletResult<(Self, Option<RecoveryPhrase>)> {
        let dir = dir.as_ref();
        let dir_lock = Self::claim_new_dir(dir)?;

        let (config, phrase) = match &params {
            KeymanagerParams::Direct { password } => {
                password.ensure_strength(options.min_password_len)?;
                let keystore_dir = dir.join(DIRECT_DIR);
                fs::create_dir_all(&keystore_dir).map_err(|e| {
                    WalletError::io(format!("creating {}", keystore_dir.display()), e)
                })?;
                let config = WalletConfig::new_local(KeymanagerKind::Direct, password, &options.kdf)?;
                (config, None)
            }
            KeymanagerParams::Derived {
                password,
                entropy_bits,
                passphrase,
            } => {
                password.ensure_strength(options.min_password_len)?;
                let phrase = derivation::generate_mnemonic(*entropy_bits)?;
                let seed = derivation::derive_seed(&phrase, passphrase)?;
                DerivedKeymanager::initialize(
                    &DerivedKeystore::new(dir.join(DERIVED_DIR)),
                    &seed,
                    password,
                    &options.kdf,
                    0,
                )?;
                let config =
                    WalletConfig::new_local(KeymanagerKind::Derived, password, &options.kdf)?;
                (config, Some(phrase))
            }
            KeymanagerParams::Remote { identity } => {
                // Fail now rather than at first unlock if the PEMs are unusable
                RemoteChannel::open(identity, options.remote_timeout)?;
                (WalletConfig::new_remote(identity.clone()), None)
            }
        };

        // Written last so a failed create never leaves a loadable wallet
        config.save(dir)?;
        info!("created {} wallet at {}", config.kind, dir.display());

        let wallet = Self::assemble(dir, config, options, dir_lock)?;
        Ok((wallet, phrase))
    }

    /// Open an existing wallet.
    pub fn open(dir: impl AsRef<Path>, options: WalletOptions) -> WalletResult<Self> {
        let dir = dir.as_ref();
        if !WalletConfig::exists(dir) {
            return Err(WalletError::NotFound(dir.to_path_buf()));
        }
        let dir_lock = DirLock::acquire(dir)?;
        let config = WalletConfig::load(dir)?;
        debug!("opened {} wallet at {}", config.kind, dir.display());
        Self::assemble(dir, config, options, dir_lock)
    }

    /// Rebuild a derived wallet from `phrase` into a new directory,
    /// re-deriving accounts `0..num_accounts`.
    pub fn recover(
        dir: impl AsRef<Path>,
        phrase: &str,
        num_accounts: u32,
        password: &Password,
        options: WalletOptions,
    ) -> WalletResult<Self> {
        Self::recover_with_passphrase(dir, phrase, "", num_accounts, password, options)
    }

    /// [`Wallet::recover`] for phrases created with a BIP39 passphrase.
    pub fn recover_with_passphrase(
        dir: impl AsRef<Path>,
        phrase: &str,
        passphrase: &str,
        num_accounts: u32,
        password: &Password,
        options: WalletOptions,
    ) -> WalletResult<Self> {
        let dir = dir.as_ref();
        let phrase = RecoveryPhrase::parse(phrase)?;
        password.ensure_strength(options.min_password_len)?;
        let dir_lock = Self::claim_new_dir(dir)?;

        let seed = derivation::derive_seed(&phrase, passphrase)?;
        DerivedKeymanager::initialize(
            &DerivedKeystore::new(dir.join(DERIVED_DIR)),
            &seed,
            password,
            &options.kdf,
            num_accounts,
        )?;
        let config = WalletConfig::new_local(KeymanagerKind::Derived, password, &options.kdf)?;
        config.save(dir)?;
        info!(
            "recovered derived wallet at {} with {} account(s)",
            dir.display(),
            num_accounts
        );

        Self::assemble(dir, config, options, dir_lock)
    }

    /// Make keys available for signing. Direct and derived wallets check the
    /// password against the configuration before decrypting any key; remote
    /// wallets take no password and only load their TLS identity.
    pub async fn unlock(&mut self, password: Option<&Password>) -> WalletResult<()> {
        self.ensure_open()?;
        match &*self.keymanager {
            AnyKeymanager::Direct(km) => {
                let password = password.ok_or(WalletError::WrongPassword)?;
                self.config
                    .verify_password(password, &WalletConfig::path(&self.dir))?;
                km.unlock(password).await?;
            }
            AnyKeymanager::Derived(km) => {
                let password = password.ok_or(WalletError::WrongPassword)?;
                self.config
                    .verify_password(password, &WalletConfig::path(&self.dir))?;
                km.unlock(password).await?;
            }
            AnyKeymanager::Remote(km) => km.unlock().await?,
        }
        self.state = WalletState::Unlocked;
        info!("wallet at {} unlocked", self.dir.display());
        Ok(())
    }

    pub async fn lock(&mut self) -> WalletResult<()> {
        self.ensure_open()?;
        self.keymanager.lock().await;
        self.state = WalletState::Locked;
        info!("wallet at {} locked", self.dir.display());
        Ok(())
    }

    /// Lock the keymanager and release the directory lock.
    pub async fn close(&mut self) {
        if self.state == WalletState::Closed {
            return;
        }
        self.keymanager.lock().await;
        self.dir_lock = None;
        self.state = WalletState::Closed;
        info!("wallet at {} closed", self.dir.display());
    }

    /// Rewrite the persisted configuration. Fields that do not apply to the
    /// wallet's kind are refused before the lock state is considered.
    pub async fn edit_config(&mut self, edit: ConfigEdit) -> WalletResult<()> {
        self.ensure_open()?;
        let kind = self.config.kind;
        if kind != KeymanagerKind::Remote {
            if let Some(field) = edit.first_remote_field() {
                return Err(WalletError::UnsupportedForKind { field, kind });
            }
        }
        if self.state != WalletState::Unlocked {
            return Err(WalletError::Locked);
        }
        if edit.is_empty() {
            return Ok(());
        }

        if let AnyKeymanager::Remote(km) = &*self.keymanager {
            let (settings, timeout) = self.edited_remote_settings(&edit)?;
            km.reconfigure(settings.identity.clone(), timeout).await?;
            self.config.remote = Some(settings);
        }

        self.config.save(&self.dir)?;
        info!("updated configuration of wallet at {}", self.dir.display());
        Ok(())
    }

    /// Unlock a remote wallet under an edited identity and persist the edit.
    ///
    /// For a stored identity that no longer loads (expired certificate,
    /// moved PEM files), which a plain [`Wallet::unlock`] refuses and
    /// [`Wallet::edit_config`] therefore cannot reach. The edited identity
    /// must load, otherwise nothing changes.
    pub async fn unlock_with_edit(&mut self, edit: ConfigEdit) -> WalletResult<()> {
        self.ensure_open()?;
        let AnyKeymanager::Remote(km) = &*self.keymanager else {
            return Err(WalletError::UnsupportedOperation {
                operation: "unlock_with_edit",
                kind: self.config.kind,
            });
        };

        let (settings, timeout) = self.edited_remote_settings(&edit)?;
        RemoteChannel::open(&settings.identity, timeout)?;
        km.reconfigure(settings.identity.clone(), timeout).await?;
        km.unlock().await?;

        self.config.remote = Some(settings);
        self.config.save(&self.dir)?;
        self.state = WalletState::Unlocked;
        info!(
            "wallet at {} unlocked with an updated remote identity",
            self.dir.display()
        );
        Ok(())
    }

    /// Reseal all local key material under `new`. The configuration and
    /// every sealed file are staged first and replaced together, so a
    /// failure partway leaves the wallet under `old`.
    pub async fn change_password(&mut self, old: &Password, new: &Password) -> WalletResult<()> {
        self.ensure_open()?;
        new.ensure_strength(self.options.min_password_len)?;
        let config_path = WalletConfig::path(&self.dir);
        if let AnyKeymanager::Remote(_) = &*self.keymanager {
            return Err(WalletError::UnsupportedOperation {
                operation: "change_password",
                kind: KeymanagerKind::Remote,
            });
        }
        self.config.verify_password(old, &config_path)?;

        let mut config = self.config.clone();
        config.reseal_password_check(new, &self.options.kdf)?;
        let mut staged = StagedWrites::new();
        config.stage(&self.dir, &mut staged)?;

        match &*self.keymanager {
            AnyKeymanager::Direct(km) => km.change_password(old, new, staged).await?,
            AnyKeymanager::Derived(km) => km.change_password(old, new, staged).await?,
            AnyKeymanager::Remote(_) => {}
        }

        self.config = config;
        info!("password changed for wallet at {}", self.dir.display());
        Ok(())
    }

    /// Shared handle for runtime signers.
    pub fn keymanager(&self) -> Arc<AnyKeymanager> {
        self.keymanager.clone()
    }

    pub fn kind(&self) -> KeymanagerKind {
        self.config.kind
    }

    pub fn state(&self) -> WalletState {
        self.state
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Stored remote settings with `edit` applied, and the timeout they imply.
    fn edited_remote_settings(
        &self,
        edit: &ConfigEdit,
    ) -> WalletResult<(RemoteSettings, Duration)> {
        let mut settings =
            self.config
                .remote
                .clone()
                .ok_or_else(|| WalletError::CorruptConfig {
                    path: WalletConfig::path(&self.dir),
                    reason: "remote wallet has no [remote] section".to_string(),
                })?;
        edit.apply(&mut settings);
        let timeout = settings
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.remote_timeout);
        Ok((settings, timeout))
    }

    fn ensure_open(&self) -> WalletResult<()> {
        if self.state == WalletState::Closed {
            return Err(WalletError::Closed);
        }
        Ok(())
    }

    /// Create and lock `dir`, refusing one that already holds a wallet.
    fn claim_new_dir(dir: &Path) -> WalletResult<DirLock> {
        fs::create_dir_all(dir)
            .map_err(|e| WalletError::io(format!("creating {}", dir.display()), e))?;
        let dir_lock = DirLock::acquire(dir)?;
        if WalletConfig::exists(dir) {
            return Err(WalletError::AlreadyExists(dir.to_path_buf()));
        }
        Ok(dir_lock)
    }

    fn assemble(
        dir: &Path,
        config: WalletConfig,
        options: WalletOptions,
        dir_lock: DirLock,
    ) -> WalletResult<Self> {
        let keymanager = match config.kind {
            KeymanagerKind::Direct => AnyKeymanager::Direct(DirectKeymanager::new(
                DirectKeystore::new(dir.join(DIRECT_DIR)),
                options.kdf,
                options.account_lock_timeout,
            )),
            KeymanagerKind::Derived => AnyKeymanager::Derived(DerivedKeymanager::new(
                DerivedKeystore::new(dir.join(DERIVED_DIR)),
                options.kdf,
                options.account_lock_timeout,
            )),
            KeymanagerKind::Remote => {
                let settings = config
                    .remote
                    .as_ref()
                    .ok_or_else(|| WalletError::CorruptConfig {
                        path: WalletConfig::path(dir),
                        reason: "remote wallet has no [remote] section".to_string(),
                    })?;
                AnyKeymanager::Remote(RemoteKeymanager::new(
                    settings.identity.clone(),
                    config.remote_timeout(options.remote_timeout),
                    options.account_lock_timeout,
                ))
            }
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            options,
            state: WalletState::Created,
            keymanager: Arc::new(keymanager),
            dir_lock: Some(dir_lock),
        })
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("dir", &self.dir)
            .field("kind", &self.config.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{keymanager::Keymanager, secret_store::KdfParams};
    use tempfile::TempDir;

    fn options() -> WalletOptions {
        WalletOptions::default().with_kdf(KdfParams::new(8, 1, 1))
    }

    fn direct(password: &str) -> KeymanagerParams {
        KeymanagerParams::Direct {
            password: Password::new(password),
        }
    }

    #[test]
    fn test_create_refuses_existing_wallet() {
        let temp_dir = TempDir::new().unwrap();
        let (wallet, phrase) =
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()).unwrap();
        assert!(phrase.is_none());
        assert_eq!(wallet.state(), WalletState::Created);
        drop(wallet);

        assert!(matches!(
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()),
            Err(WalletError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_weak_password_refused() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            Wallet::create(temp_dir.path(), direct(""), options()),
            Err(WalletError::WeakPassword { .. })
        ));
        assert!(matches!(
            Wallet::create(
                temp_dir.path(),
                direct("pw"),
                options().with_min_password_len(8)
            ),
            Err(WalletError::WeakPassword { min_len: 8 })
        ));
        assert!(!WalletConfig::exists(temp_dir.path()));
    }

    #[test]
    fn test_open_missing_wallet() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            Wallet::open(temp_dir.path().join("nowhere"), options()),
            Err(WalletError::NotFound(_))
        ));
    }

    #[test]
    fn test_directory_lock_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let (wallet, _) =
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()).unwrap();
        assert!(matches!(
            Wallet::open(temp_dir.path(), options()),
            Err(WalletError::WalletBusy(_))
        ));
        drop(wallet);
        assert!(Wallet::open(temp_dir.path(), options()).is_ok());
    }

    #[tokio::test]
    async fn test_close_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let (mut wallet, _) =
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()).unwrap();
        wallet.close().await;
        assert_eq!(wallet.state(), WalletState::Closed);
        assert!(matches!(
            wallet.unlock(Some(&Password::new("wallet-password"))).await,
            Err(WalletError::Closed)
        ));

        let reopened = Wallet::open(temp_dir.path(), options()).unwrap();
        assert_eq!(reopened.kind(), KeymanagerKind::Direct);
    }

    #[tokio::test]
    async fn test_unlock_checks_password_first() {
        let temp_dir = TempDir::new().unwrap();
        let (mut wallet, _) =
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()).unwrap();

        assert!(matches!(
            wallet.unlock(Some(&Password::new("not-it-at-all"))).await,
            Err(WalletError::WrongPassword)
        ));
        assert!(matches!(wallet.unlock(None).await, Err(WalletError::WrongPassword)));
        assert_eq!(wallet.state(), WalletState::Created);

        wallet
            .unlock(Some(&Password::new("wallet-password")))
            .await
            .unwrap();
        assert_eq!(wallet.state(), WalletState::Unlocked);
        assert!(wallet.keymanager().is_unlocked().await);
    }

    #[tokio::test]
    async fn test_derived_create_returns_phrase() {
        let temp_dir = TempDir::new().unwrap();
        let (mut wallet, phrase) = Wallet::create(
            temp_dir.path(),
            KeymanagerParams::Derived {
                password: Password::new("wallet-password"),
                entropy_bits: 128,
                passphrase: String::new(),
            },
            options(),
        )
        .unwrap();
        assert_eq!(phrase.unwrap().word_count(), 12);

        let keymanager = wallet.keymanager();
        assert!(keymanager.list_accounts().await.unwrap().is_empty());
        wallet
            .unlock(Some(&Password::new("wallet-password")))
            .await
            .unwrap();
        keymanager.create_account().await.unwrap();
        assert_eq!(keymanager.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_password() {
        let temp_dir = TempDir::new().unwrap();
        let old = Password::new("wallet-password");
        let new = Password::new("another-password");
        let (mut wallet, _) =
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()).unwrap();
        wallet.unlock(Some(&old)).await.unwrap();
        wallet.keymanager().create_account().await.unwrap();

        assert!(matches!(
            wallet.change_password(&old, &Password::new("")).await,
            Err(WalletError::WeakPassword { .. })
        ));
        wallet.change_password(&old, &new).await.unwrap();
        wallet.close().await;

        let mut reopened = Wallet::open(temp_dir.path(), options()).unwrap();
        assert!(matches!(
            reopened.unlock(Some(&old)).await,
            Err(WalletError::WrongPassword)
        ));
        reopened.unlock(Some(&new)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_password_change_keeps_old_password() {
        let temp_dir = TempDir::new().unwrap();
        let old = Password::new("wallet-password");
        let new = Password::new("another-password");
        let (mut wallet, _) =
            Wallet::create(temp_dir.path(), direct("wallet-password"), options()).unwrap();
        wallet.unlock(Some(&old)).await.unwrap();
        let keymanager = wallet.keymanager();
        let mut accounts = Vec::new();
        for _ in 0..3 {
            accounts.push(keymanager.create_account().await.unwrap());
        }

        // Make staging fail for one of the keystores
        let keystore = DirectKeystore::new(temp_dir.path().join(DIRECT_DIR));
        let blocked = crate::keystore::staged_path(&keystore.path_for(&accounts[2]));
        fs::create_dir(&blocked).unwrap();

        assert!(matches!(
            wallet.change_password(&old, &new).await,
            Err(WalletError::Io { .. })
        ));
        fs::remove_dir(&blocked).unwrap();
        wallet.close().await;

        let mut reopened = Wallet::open(temp_dir.path(), options()).unwrap();
        assert!(matches!(
            reopened.unlock(Some(&new)).await,
            Err(WalletError::WrongPassword)
        ));
        reopened.unlock(Some(&old)).await.unwrap();
        let root = crate::types::SigningRoot::new([1; 32]);
        for account in &accounts {
            assert!(reopened.keymanager().sign(account, &root).await.is_ok());
        }
    }
}
