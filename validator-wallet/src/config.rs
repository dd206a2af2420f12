//! Wallet configuration
//!
//! `wallet.toml` records the keymanager kind bound to a wallet and its
//! non-secret settings. Direct and derived wallets also store a sealed
//! checksum that lets `unlock` verify a password before touching any key.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{WalletError, WalletResult},
    keystore::{write_private_file, StagedWrites},
    remote::RemoteIdentity,
    secret_store::{self, KdfParams, Password, SealedSecret},
    types::KeymanagerKind,
};

/// Configuration file name inside the wallet directory
pub const CONFIG_FILE: &str = "wallet.toml";

/// Current configuration format version
pub const CONFIG_VERSION: u32 = 1;

/// Default remote signer round-trip timeout
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a busy account before giving up
pub const DEFAULT_ACCOUNT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Persisted wallet configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    pub version: u32,
    pub kind: KeymanagerKind,
    pub created_at: i64,

    /// Sealed checksum, direct and derived wallets only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_check: Option<SealedSecret>,

    /// Signer settings, remote wallets only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSettings>,
}

/// `[remote]` section of `wallet.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(flatten)]
    pub identity: RemoteIdentity,

    /// Per-request timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl WalletConfig {
    /// Configuration for a new password-protected wallet.
    pub fn new_local(
        kind: KeymanagerKind,
        password: &Password,
        kdf: &KdfParams,
    ) -> WalletResult<Self> {
        let check = secret_store::encrypt(&password_checksum(kind), password, kdf)?;
        Ok(Self {
            version: CONFIG_VERSION,
            kind,
            created_at: chrono::Utc::now().timestamp(),
            password_check: Some(check),
            remote: None,
        })
    }

    /// Configuration for a new remote wallet.
    pub fn new_remote(identity: RemoteIdentity) -> Self {
        Self {
            version: CONFIG_VERSION,
            kind: KeymanagerKind::Remote,
            created_at: chrono::Utc::now().timestamp(),
            password_check: None,
            remote: Some(RemoteSettings {
                identity,
                timeout_ms: None,
            }),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).exists()
    }

    /// Read and validate `<dir>/wallet.toml`.
    pub fn load(dir: &Path) -> WalletResult<Self> {
        let path = Self::path(dir);
        if !path.exists() {
            return Err(WalletError::NotFound(dir.to_path_buf()));
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| WalletError::io(format!("reading {}", path.display()), e))?;
        let config: WalletConfig =
            toml::from_str(&contents).map_err(|e| WalletError::CorruptConfig {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        config.validate(&path)?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> WalletResult<()> {
        write_private_file(&Self::path(dir), self.to_toml()?.as_bytes())
    }

    /// Stage this configuration to replace the one in `dir`.
    pub fn stage(&self, dir: &Path, staged: &mut StagedWrites) -> WalletResult<()> {
        staged.stage(&Self::path(dir), self.to_toml()?.as_bytes())
    }

    fn to_toml(&self) -> WalletResult<String> {
        toml::to_string_pretty(self).map_err(|e| WalletError::Serialization(e.to_string()))
    }

    fn validate(&self, path: &Path) -> WalletResult<()> {
        let corrupt = |reason: String| WalletError::CorruptConfig {
            path: path.to_path_buf(),
            reason,
        };

        if self.version != CONFIG_VERSION {
            return Err(corrupt(format!("unsupported version {}", self.version)));
        }
        match self.kind {
            KeymanagerKind::Direct | KeymanagerKind::Derived => {
                if self.password_check.is_none() {
                    return Err(corrupt(format!(
                        "{} wallet has no password check",
                        self.kind
                    )));
                }
                if self.remote.is_some() {
                    return Err(corrupt(format!(
                        "{} wallet carries remote signer settings",
                        self.kind
                    )));
                }
            }
            KeymanagerKind::Remote => {
                if self.remote.is_none() {
                    return Err(corrupt("remote wallet has no [remote] section".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Check `password` against the sealed checksum.
    pub fn verify_password(&self, password: &Password, path: &Path) -> WalletResult<()> {
        let check = self
            .password_check
            .as_ref()
            .ok_or_else(|| WalletError::CorruptConfig {
                path: path.to_path_buf(),
                reason: "missing password check".to_string(),
            })?;
        let opened = secret_store::decrypt(check, password)?;
        if opened.as_slice() != password_checksum(self.kind).as_slice() {
            return Err(WalletError::CorruptConfig {
                path: path.to_path_buf(),
                reason: "password check does not match wallet kind".to_string(),
            });
        }
        Ok(())
    }

    /// Reseal the checksum under a new password.
    pub fn reseal_password_check(&mut self, password: &Password, kdf: &KdfParams) -> WalletResult<()> {
        self.password_check = Some(secret_store::encrypt(
            &password_checksum(self.kind),
            password,
            kdf,
        )?);
        Ok(())
    }

    /// Effective remote timeout: the persisted override, else `default`.
    pub fn remote_timeout(&self, default: Duration) -> Duration {
        self.remote
            .as_ref()
            .and_then(|remote| remote.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

fn password_checksum(kind: KeymanagerKind) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"validator-wallet/password-check/v1/");
    hasher.update(kind.as_str().as_bytes());
    hasher.finalize().into()
}

/// Construction options passed explicitly into every wallet entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletOptions {
    /// Argon2id parameters for newly sealed secrets
    pub kdf: KdfParams,
    /// Remote signer round-trip bound, unless `wallet.toml` overrides it
    pub remote_timeout: Duration,
    /// How long `sign` waits for a busy account
    pub account_lock_timeout: Duration,
    /// Shortest password accepted for new key material
    pub min_password_len: usize,
}

impl Default for WalletOptions {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            account_lock_timeout: DEFAULT_ACCOUNT_LOCK_TIMEOUT,
            min_password_len: 1,
        }
    }
}

impl WalletOptions {
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_account_lock_timeout(mut self, timeout: Duration) -> Self {
        self.account_lock_timeout = timeout;
        self
    }

    pub fn with_min_password_len(mut self, min_len: usize) -> Self {
        self.min_password_len = min_len;
        self
    }
}

/// Changes accepted by `Wallet::edit_config`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEdit {
    pub remote_address: Option<String>,
    pub remote_cert: Option<PathBuf>,
    pub remote_key: Option<PathBuf>,
    pub remote_ca_cert: Option<PathBuf>,
    pub remote_server_name: Option<String>,
    pub remote_timeout: Option<Duration>,
}

impl ConfigEdit {
    pub fn is_empty(&self) -> bool {
        self == &ConfigEdit::default()
    }

    /// Flag name of the first remote-only field that is set.
    pub fn first_remote_field(&self) -> Option<&'static str> {
        [
            ("remote-address", self.remote_address.is_some()),
            ("remote-cert", self.remote_cert.is_some()),
            ("remote-key", self.remote_key.is_some()),
            ("remote-ca-cert", self.remote_ca_cert.is_some()),
            ("remote-server-name", self.remote_server_name.is_some()),
            ("remote-timeout", self.remote_timeout.is_some()),
        ]
        .into_iter()
        .find_map(|(name, set)| set.then_some(name))
    }

    /// Apply the set fields to remote settings.
    pub fn apply(&self, settings: &mut RemoteSettings) {
        let identity = &mut settings.identity;
        if let Some(address) = &self.remote_address {
            identity.address = address.clone();
        }
        if let Some(cert) = &self.remote_cert {
            identity.client_cert = cert.clone();
        }
        if let Some(key) = &self.remote_key {
            identity.client_key = key.clone();
        }
        if let Some(ca) = &self.remote_ca_cert {
            identity.ca_cert = ca.clone();
        }
        if let Some(name) = &self.remote_server_name {
            identity.server_name = Some(name.clone());
        }
        if let Some(timeout) = self.remote_timeout {
            settings.timeout_ms = Some(timeout.as_millis() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FAST: KdfParams = KdfParams::new(8, 1, 1);

    #[test]
    fn test_local_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let password = Password::new("config-password");
        let config = WalletConfig::new_local(KeymanagerKind::Derived, &password, &FAST).unwrap();
        config.save(temp_dir.path()).unwrap();

        let loaded = WalletConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded, config);
        let path = WalletConfig::path(temp_dir.path());
        assert!(loaded.verify_password(&password, &path).is_ok());
        assert!(matches!(
            loaded.verify_password(&Password::new("wrong-password"), &path),
            Err(WalletError::WrongPassword)
        ));
    }

    #[test]
    fn test_remote_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = WalletConfig::new_remote(
            RemoteIdentity::new("signer:9000", "/c.pem", "/k.pem", "/ca.pem")
                .with_server_name("signer.internal"),
        );
        ConfigEdit {
            remote_timeout: Some(Duration::from_millis(2500)),
            ..Default::default()
        }
        .apply(config.remote.as_mut().unwrap());
        config.save(temp_dir.path()).unwrap();

        let raw = fs::read_to_string(WalletConfig::path(temp_dir.path())).unwrap();
        assert!(raw.contains("kind = \"remote\""));
        assert!(raw.contains("[remote]"));

        let loaded = WalletConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.remote_timeout(DEFAULT_REMOTE_TIMEOUT),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_missing_and_corrupt_config() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            WalletConfig::load(temp_dir.path()),
            Err(WalletError::NotFound(_))
        ));

        fs::write(WalletConfig::path(temp_dir.path()), "kind = 7\n").unwrap();
        assert!(matches!(
            WalletConfig::load(temp_dir.path()),
            Err(WalletError::CorruptConfig { .. })
        ));

        fs::write(
            WalletConfig::path(temp_dir.path()),
            "version = 1\nkind = \"remote\"\ncreated_at = 0\n",
        )
        .unwrap();
        assert!(matches!(
            WalletConfig::load(temp_dir.path()),
            Err(WalletError::CorruptConfig { .. })
        ));
    }

    #[test]
    fn test_password_check_bound_to_kind() {
        let password = Password::new("config-password");
        let mut config = WalletConfig::new_local(KeymanagerKind::Direct, &password, &FAST).unwrap();
        config.kind = KeymanagerKind::Derived;
        assert!(matches!(
            config.verify_password(&password, Path::new("wallet.toml")),
            Err(WalletError::CorruptConfig { .. })
        ));
    }

    #[test]
    fn test_config_edit_fields() {
        assert!(ConfigEdit::default().is_empty());
        assert_eq!(ConfigEdit::default().first_remote_field(), None);

        let edit = ConfigEdit {
            remote_ca_cert: Some(PathBuf::from("/new-ca.pem")),
            remote_server_name: Some("signer-2".to_string()),
            ..Default::default()
        };
        assert!(!edit.is_empty());
        assert_eq!(edit.first_remote_field(), Some("remote-ca-cert"));

        let mut settings = RemoteSettings {
            identity: RemoteIdentity::new("a:1", "/c.pem", "/k.pem", "/ca.pem"),
            timeout_ms: None,
        };
        edit.apply(&mut settings);
        assert_eq!(settings.identity.ca_cert, PathBuf::from("/new-ca.pem"));
        assert_eq!(settings.identity.server_name.as_deref(), Some("signer-2"));
        assert_eq!(settings.identity.address, "a:1");
    }
}
