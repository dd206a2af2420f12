//! Secret Store
//!
//! Seals raw key bytes at rest using:
//! - Argon2id for password-based key derivation
//! - ChaCha20-Poly1305 for authenticated encryption
//!
//! Every sealed blob carries its own salt, nonce and KDF parameters, so
//! blobs written under older parameters stay readable after the defaults
//! change. Plaintext only ever leaves this module inside a [`SecretBytes`]
//! buffer, which is overwritten when dropped on every exit path.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{WalletError, WalletResult};

/// Current sealed blob format version
pub const SEALED_VERSION: u32 = 1;

/// Minimum password length the CLI asks for when setting a password
pub const MIN_PASSWORD_LEN: usize = 8;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Decrypted secret bytes, zeroed on drop.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    fn argon2(&self) -> WalletResult<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| WalletError::CorruptData(format!("invalid KDF parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 4 lanes: roughly a second on commodity hardware.
    fn default() -> Self {
        Self::new(65536, 3, 4)
    }
}

/// A wallet password, zeroed on drop.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// Build a password from raw password-file contents. Trailing newlines
    /// are stripped since most editors append one.
    pub fn from_file_contents(contents: String) -> Self {
        let contents = Zeroizing::new(contents);
        Self::new(contents.trim_end_matches(['\n', '\r']))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Reject passwords shorter than `min_len` characters. Empty passwords
    /// are always rejected.
    pub fn ensure_strength(&self, min_len: usize) -> WalletResult<()> {
        let min_len = min_len.max(1);
        if self.0.chars().count() < min_len {
            return Err(WalletError::WeakPassword { min_len });
        }
        Ok(())
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Encrypted blob produced by [`encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Blob format version
    pub version: u32,

    /// KDF parameters used to derive the cipher key
    pub kdf: KdfParams,

    /// Argon2 salt (hex)
    salt: String,

    /// ChaCha20-Poly1305 nonce (hex)
    nonce: String,

    /// Ciphertext with authentication tag (hex)
    ciphertext: String,
}

/// Seal `plaintext` under `password`.
pub fn encrypt(
    plaintext: &[u8],
    password: &Password,
    params: &KdfParams,
) -> WalletResult<SealedSecret> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, params)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| WalletError::CorruptData("invalid cipher key length".to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| WalletError::CorruptData("encryption failed".to_string()))?;

    Ok(SealedSecret {
        version: SEALED_VERSION,
        kdf: *params,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Open a blob sealed by [`encrypt`].
///
/// An authentication failure is reported as [`WalletError::WrongPassword`];
/// a malformed blob as [`WalletError::CorruptData`].
pub fn decrypt(sealed: &SealedSecret, password: &Password) -> WalletResult<SecretBytes> {
    if sealed.version != SEALED_VERSION {
        return Err(WalletError::CorruptData(format!(
            "unsupported sealed secret version {} (expected {})",
            sealed.version, SEALED_VERSION
        )));
    }

    let salt = decode_field("salt", &sealed.salt, Some(SALT_LEN))?;
    let nonce_bytes = decode_field("nonce", &sealed.nonce, Some(NONCE_LEN))?;
    let ciphertext = decode_field("ciphertext", &sealed.ciphertext, None)?;

    let key = derive_key(password, &salt, &sealed.kdf)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|_| WalletError::CorruptData("invalid cipher key length".to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| WalletError::WrongPassword)
}

/// Overwrite a buffer holding secret material.
pub fn secure_erase(buf: &mut [u8]) {
    buf.zeroize();
}

fn decode_field(name: &str, value: &str, expected_len: Option<usize>) -> WalletResult<Vec<u8>> {
    let bytes = hex::decode(value)
        .map_err(|e| WalletError::CorruptData(format!("invalid {} encoding: {}", name, e)))?;
    match expected_len {
        Some(len) if bytes.len() != len => Err(WalletError::CorruptData(format!(
            "invalid {} length {} (expected {})",
            name,
            bytes.len(),
            len
        ))),
        _ => Ok(bytes),
    }
}

fn derive_key(
    password: &Password,
    salt: &[u8],
    params: &KdfParams,
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    params
        .argon2()?
        .hash_password_into(password.expose().as_bytes(), salt, &mut key[..])
        .map_err(|e| WalletError::CorruptData(format!("key derivation failed: {}", e)))?;
    Ok(key)
}
