//! Mnemonic and key derivation
//!
//! Handles BIP39 mnemonic generation and SLIP-0010 Ed25519 derivation of
//! validator account keys. Account `i` lives at the all-hardened path
//! `m/12381'/3600'/i'/0'/0'`, so derivation is a pure function of
//! (phrase, passphrase, index).
//!
//! Recovery phrases are held in `Zeroizing<String>` wrappers whose pages
//! are locked with mlock()/VirtualLock() while alive.

use std::fmt;

use bip39::{Language, Mnemonic, MnemonicType};
use ed25519_dalek::SigningKey;
use zeroize::Zeroizing;

use crate::{
    error::{WalletError, WalletResult},
    secmem::{lock_bytes, lock_string, LockedRegion},
    secret_store::SecretBytes,
    types::PublicKey,
};

/// Entropy sizes accepted by [`generate_mnemonic`]
pub const SUPPORTED_ENTROPY_BITS: [usize; 5] = [128, 160, 192, 224, 256];

/// Entropy used for new wallets (24 words)
pub const DEFAULT_ENTROPY_BITS: usize = 256;

/// Length of a BIP39 seed
pub const SEED_LEN: usize = 64;

/// Hardened derivation flag for path components
const HARDENED: u32 = 0x8000_0000;

/// Purpose component of the validator key path
const PURPOSE_VALIDATOR: u32 = 12381;

/// Coin type component of the validator key path
const COIN_TYPE_VALIDATOR: u32 = 3600;

/// The SLIP-0010 path for a validator account index.
pub fn derivation_path(account_index: u32) -> WalletResult<[u32; 5]> {
    if account_index & HARDENED != 0 {
        return Err(WalletError::InvalidAccountIndex(account_index));
    }
    Ok([
        HARDENED | PURPOSE_VALIDATOR,
        HARDENED | COIN_TYPE_VALIDATOR,
        HARDENED | account_index,
        HARDENED,
        HARDENED,
    ])
}

/// A BIP39 recovery phrase.
///
/// Never logged and never persisted by the wallet; `Debug` output is
/// redacted.
pub struct RecoveryPhrase {
    /// Must drop before `phrase` so munlock runs on live memory.
    _lock: Option<LockedRegion>,
    phrase: Zeroizing<String>,
}

impl RecoveryPhrase {
    /// Parse and validate a phrase against the English wordlist and its
    /// checksum. Whitespace and case are normalized first.
    pub fn parse(phrase: &str) -> WalletResult<Self> {
        // Lowercasing at most doubles a char's UTF-8 length; no reallocation.
        let mut normalized = Zeroizing::new(String::with_capacity(phrase.len() * 2));
        for word in phrase.split_whitespace() {
            if !normalized.is_empty() {
                normalized.push(' ');
            }
            normalized.extend(word.chars().flat_map(char::to_lowercase));
        }
        let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Self::from_mnemonic(&mnemonic))
    }

    fn from_mnemonic(mnemonic: &Mnemonic) -> Self {
        let phrase = Zeroizing::new(mnemonic.phrase().to_string());
        // SAFETY: the String buffer is owned by Self and outlives the lock
        let lock = unsafe { lock_string(&phrase) };
        Self {
            _lock: Some(lock),
            phrase,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.phrase
    }

    pub fn words(&self) -> Vec<&str> {
        self.phrase.split_whitespace().collect()
    }

    pub fn word_count(&self) -> usize {
        self.phrase.split_whitespace().count()
    }

    /// Whether the phrase is pinned in RAM. Locking can fail without
    /// CAP_IPC_LOCK or once RLIMIT_MEMLOCK is reached.
    pub fn is_memory_locked(&self) -> bool {
        self._lock.as_ref().is_some_and(LockedRegion::is_locked)
    }
}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoveryPhrase(<{} words redacted>)", self.word_count())
    }
}

/// A 64-byte BIP39 seed.
pub struct Seed {
    _lock: Option<LockedRegion>,
    bytes: SecretBytes,
}

impl Seed {
    /// Wrap seed bytes recovered from the keystore.
    pub fn from_bytes(bytes: SecretBytes) -> WalletResult<Self> {
        if bytes.len() != SEED_LEN {
            return Err(WalletError::CorruptData(format!(
                "seed has {} bytes (expected {})",
                bytes.len(),
                SEED_LEN
            )));
        }
        // SAFETY: the Vec buffer is owned by Self and never reallocated
        let lock = unsafe { lock_bytes(&bytes) };
        Ok(Self {
            _lock: Some(lock),
            bytes,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(<redacted>)")
    }
}

/// Generate a fresh phrase with `entropy_bits` of entropy.
pub fn generate_mnemonic(entropy_bits: usize) -> WalletResult<RecoveryPhrase> {
    let mnemonic_type = MnemonicType::for_key_size(entropy_bits)
        .map_err(|_| WalletError::UnsupportedEntropy(entropy_bits))?;
    let mnemonic = Mnemonic::new(mnemonic_type, Language::English);
    Ok(RecoveryPhrase::from_mnemonic(&mnemonic))
}

/// Validate a phrase without keeping it around.
pub fn validate_mnemonic(phrase: &str) -> WalletResult<()> {
    RecoveryPhrase::parse(phrase).map(|_| ())
}

/// Stretch a phrase and optional passphrase into a BIP39 seed.
pub fn derive_seed(phrase: &RecoveryPhrase, passphrase: &str) -> WalletResult<Seed> {
    let mnemonic = Mnemonic::from_phrase(phrase.as_str(), Language::English)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    let seed = bip39::Seed::new(&mnemonic, passphrase);
    Seed::from_bytes(Zeroizing::new(seed.as_bytes().to_vec()))
}

/// Derive the key pair for `account_index` from `seed`.
pub fn derive_key(seed: &Seed, account_index: u32) -> WalletResult<(SigningKey, PublicKey)> {
    let path = derivation_path(account_index)?;
    let secret = Zeroizing::new(slip10_ed25519::derive_ed25519_private_key(
        seed.as_bytes(),
        &path,
    ));
    let signing_key = SigningKey::from_bytes(&secret);
    let public_key = PublicKey::from(&signing_key);
    Ok((signing_key, public_key))
}
