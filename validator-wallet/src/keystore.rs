//! Encrypted keystore files
//!
//! Persisted layout under the wallet root:
//!
//! ```text
//! direct/keystore-<pubkey>.json   one sealed Ed25519 key per account
//! derived/seed.json               sealed 64-byte BIP39 seed
//! derived/accounts.json           index -> public key metadata
//! ```
//!
//! Only sealed blobs and public keys ever reach the disk.

use std::{
    fs,
    path::{Path, PathBuf},
};

use ed25519_dalek::SigningKey;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::{
    derivation::Seed,
    error::{WalletError, WalletResult},
    secret_store::{self, KdfParams, Password, SealedSecret},
    types::PublicKey,
};

/// Current keystore file format version
pub const KEYSTORE_VERSION: u32 = 1;

const KEYSTORE_PREFIX: &str = "keystore-";
const SEED_FILE: &str = "seed.json";
const ACCOUNTS_FILE: &str = "accounts.json";

/// One sealed account key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub version: u32,
    pub public_key: PublicKey,
    pub crypto: SealedSecret,
    pub created_at: i64,
}

impl KeystoreFile {
    pub fn seal(key: &SigningKey, password: &Password, kdf: &KdfParams) -> WalletResult<Self> {
        let secret = Zeroizing::new(key.to_bytes());
        Ok(Self {
            version: KEYSTORE_VERSION,
            public_key: PublicKey::from(key),
            crypto: secret_store::encrypt(&secret[..], password, kdf)?,
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Decrypt the key and check it reproduces the recorded public key.
    pub fn open(&self, password: &Password) -> WalletResult<SigningKey> {
        if self.version != KEYSTORE_VERSION {
            return Err(WalletError::CorruptData(format!(
                "keystore for {} has unsupported version {}",
                self.public_key, self.version
            )));
        }
        let plaintext = secret_store::decrypt(&self.crypto, password)?;
        let secret: Zeroizing<[u8; 32]> =
            Zeroizing::new(plaintext.as_slice().try_into().map_err(|_| {
                WalletError::CorruptData(format!(
                    "keystore for {} holds {} bytes of key material",
                    self.public_key,
                    plaintext.len()
                ))
            })?);
        let key = SigningKey::from_bytes(&secret);
        if PublicKey::from(&key) != self.public_key {
            return Err(WalletError::CorruptData(format!(
                "keystore key does not match recorded public key {}",
                self.public_key
            )));
        }
        Ok(key)
    }
}

/// Keystore directory for a direct wallet.
#[derive(Debug, Clone)]
pub struct DirectKeystore {
    dir: PathBuf,
}

impl DirectKeystore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, public_key: &PublicKey) -> PathBuf {
        self.dir.join(format!(
            "{}{}.json",
            KEYSTORE_PREFIX,
            hex::encode(public_key.as_bytes())
        ))
    }

    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.path_for(public_key).exists()
    }

    /// Seal and persist a key. Returns its public key.
    pub fn store(
        &self,
        key: &SigningKey,
        password: &Password,
        kdf: &KdfParams,
    ) -> WalletResult<PublicKey> {
        let file = KeystoreFile::seal(key, password, kdf)?;
        self.write(&file)?;
        Ok(file.public_key)
    }

    pub fn write(&self, file: &KeystoreFile) -> WalletResult<()> {
        let json = serde_json::to_vec_pretty(file)?;
        write_private_file(&self.path_for(&file.public_key), &json)
    }

    /// Stage a replacement for an existing keystore.
    pub fn stage(&self, file: &KeystoreFile, staged: &mut StagedWrites) -> WalletResult<()> {
        staged.stage(&self.path_for(&file.public_key), &serde_json::to_vec_pretty(file)?)
    }

    /// All keystore files, oldest first.
    pub fn load_all(&self) -> WalletResult<Vec<KeystoreFile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WalletError::io(
                    format!("listing keystores in {}", self.dir.display()),
                    e,
                ))
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                WalletError::io(format!("listing keystores in {}", self.dir.display()), e)
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(KEYSTORE_PREFIX) && name.ends_with(".json") {
                files.push(read_json::<KeystoreFile>(&entry.path())?);
            }
        }
        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.public_key.cmp(&b.public_key))
        });
        Ok(files)
    }

    pub fn public_keys(&self) -> WalletResult<Vec<PublicKey>> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|file| file.public_key)
            .collect())
    }

    pub fn remove(&self, public_key: &PublicKey) -> WalletResult<()> {
        let path = self.path_for(public_key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WalletError::UnknownAccount(*public_key))
            }
            Err(e) => Err(WalletError::io(format!("removing {}", path.display()), e)),
        }
    }
}

/// Sealed seed of a derived wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedFile {
    pub version: u32,
    pub crypto: SealedSecret,
    pub created_at: i64,
}

/// Metadata linking derived accounts to their index. Holds no secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAccounts {
    /// Next unused index; never decreases so indices are not reused
    pub next_index: u32,
    pub accounts: Vec<DerivedAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAccount {
    pub index: u32,
    pub public_key: PublicKey,
}

impl DerivedAccounts {
    pub fn index_of(&self, public_key: &PublicKey) -> Option<u32> {
        self.accounts
            .iter()
            .find(|account| &account.public_key == public_key)
            .map(|account| account.index)
    }
}

/// Keystore directory for a derived wallet.
#[derive(Debug, Clone)]
pub struct DerivedKeystore {
    dir: PathBuf,
}

impl DerivedKeystore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_seed(&self, seed: &Seed, password: &Password, kdf: &KdfParams) -> WalletResult<()> {
        let file = Self::seal_seed(seed, password, kdf)?;
        write_private_file(&self.dir.join(SEED_FILE), &serde_json::to_vec_pretty(&file)?)
    }

    /// Stage the seed resealed under `password`.
    pub fn stage_seed(
        &self,
        seed: &Seed,
        password: &Password,
        kdf: &KdfParams,
        staged: &mut StagedWrites,
    ) -> WalletResult<()> {
        let file = Self::seal_seed(seed, password, kdf)?;
        staged.stage(&self.dir.join(SEED_FILE), &serde_json::to_vec_pretty(&file)?)
    }

    fn seal_seed(seed: &Seed, password: &Password, kdf: &KdfParams) -> WalletResult<SeedFile> {
        Ok(SeedFile {
            version: KEYSTORE_VERSION,
            crypto: secret_store::encrypt(seed.as_bytes(), password, kdf)?,
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    pub fn open_seed(&self, password: &Password) -> WalletResult<Seed> {
        let file: SeedFile = read_json(&self.dir.join(SEED_FILE))?;
        if file.version != KEYSTORE_VERSION {
            return Err(WalletError::CorruptData(format!(
                "seed file has unsupported version {}",
                file.version
            )));
        }
        Seed::from_bytes(secret_store::decrypt(&file.crypto, password)?)
    }

    pub fn load_accounts(&self) -> WalletResult<DerivedAccounts> {
        let path = self.dir.join(ACCOUNTS_FILE);
        if !path.exists() {
            return Ok(DerivedAccounts::default());
        }
        read_json(&path)
    }

    pub fn save_accounts(&self, accounts: &DerivedAccounts) -> WalletResult<()> {
        write_private_file(
            &self.dir.join(ACCOUNTS_FILE),
            &serde_json::to_vec_pretty(accounts)?,
        )
    }
}

/// Write a file readable only by the owner, via a temp file and rename so
/// a crash never leaves a truncated file behind.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> WalletResult<()> {
    let tmp = path.with_extension("tmp");
    write_synced(&tmp, contents)?;
    fs::rename(&tmp, path).map_err(|e| WalletError::io(format!("replacing {}", path.display()), e))
}

/// Create or truncate `path` with owner-only permissions and sync it.
fn write_synced(path: &Path, contents: &[u8]) -> WalletResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| WalletError::io(format!("creating {}", parent.display()), e))?;
    }

    let write = || -> std::io::Result<()> {
        use std::io::Write;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    };
    write().map_err(|e| WalletError::io(format!("writing {}", path.display()), e))
}

/// Where [`StagedWrites`] puts the new version of `path`.
pub(crate) fn staged_path(path: &Path) -> PathBuf {
    path.with_extension("staged")
}

/// A set of files replaced together.
///
/// Every new version is written and synced next to its target before any
/// target is touched, so a failure while staging leaves all targets as they
/// were. Staged files that were never committed are removed on drop.
#[derive(Debug, Default)]
pub struct StagedWrites {
    /// (staged file, target)
    pending: Vec<(PathBuf, PathBuf)>,
}

impl StagedWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, path: &Path, contents: &[u8]) -> WalletResult<()> {
        let staged = staged_path(path);
        write_synced(&staged, contents)?;
        self.pending.push((staged, path.to_path_buf()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Rename every staged file over its target.
    pub fn commit(mut self) -> WalletResult<()> {
        while let Some((staged, target)) = self.pending.first() {
            fs::rename(staged, target)
                .map_err(|e| WalletError::io(format!("replacing {}", target.display()), e))?;
            self.pending.remove(0);
        }
        Ok(())
    }
}

impl Drop for StagedWrites {
    fn drop(&mut self) {
        for (staged, _) in self.pending.drain(..) {
            match fs::remove_file(&staged) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove staged file {}: {}", staged.display(), e),
            }
        }
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> WalletResult<T> {
    let json = fs::read(path).map_err(|e| WalletError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&json).map_err(|e| {
        WalletError::CorruptData(format!("failed to parse {}: {}", path.display(), e))
    })
}
