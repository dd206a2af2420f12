//! Account identifiers and signing primitives shared by every keymanager.

use std::{fmt, str::FromStr};

use ed25519_dalek::{Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of an account public key in bytes
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a signature in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Length of a signing root in bytes
pub const SIGNING_ROOT_LEN: usize = 32;

/// Custody model bound to a wallet for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeymanagerKind {
    /// Encrypted keys generated and stored locally, one per account
    Direct,
    /// Accounts regenerated from one mnemonic seed plus an index
    Derived,
    /// Signing delegated to a remote service over mutual TLS
    Remote,
}

impl KeymanagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeymanagerKind::Direct => "direct",
            KeymanagerKind::Derived => "derived",
            KeymanagerKind::Remote => "remote",
        }
    }
}

impl fmt::Display for KeymanagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeymanagerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(KeymanagerKind::Direct),
            "derived" => Ok(KeymanagerKind::Derived),
            "remote" => Ok(KeymanagerKind::Remote),
            other => Err(format!(
                "unknown keymanager kind '{}' (expected direct, derived or remote)",
                other
            )),
        }
    }
}

/// Ed25519 account public key. This is the stable account identifier
/// across all keymanager kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Abbreviated hex form used in log lines
    pub fn short(&self) -> String {
        format!("0x{}…", hex::encode(&self.0[..6]))
    }

    /// Check `signature` over `root` against this key.
    pub fn verify(&self, root: &SigningRoot, signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        key.verify(root.as_bytes(), &signature).is_ok()
    }
}

impl From<&ed25519_dalek::SigningKey> for PublicKey {
    fn from(key: &ed25519_dalek::SigningKey) -> Self {
        Self(key.verifying_key().to_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| format!("invalid public key '{}': {}", s, e))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The fixed-size digest a validator key is asked to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningRoot([u8; SIGNING_ROOT_LEN]);

impl SigningRoot {
    pub const fn new(bytes: [u8; SIGNING_ROOT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNING_ROOT_LEN] {
        &self.0
    }
}

impl From<[u8; SIGNING_ROOT_LEN]> for SigningRoot {
    fn from(bytes: [u8; SIGNING_ROOT_LEN]) -> Self {
        Self(bytes)
    }
}

/// Ed25519 signature over a [`SigningRoot`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    pub const fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; SIGNATURE_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl From<ed25519_dalek::Signature> for Signature {
    fn from(sig: ed25519_dalek::Signature) -> Self {
        Self(sig.to_bytes())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}
