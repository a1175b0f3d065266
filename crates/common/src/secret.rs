//! Folder secret and derived identities
//!
//! Every shared folder is rooted in a single Ed25519 signing key, the
//! `FolderSecret`. Whoever holds it can author metadata records for the
//! folder. Two values are derived from it:
//! - `FolderKey`: the verifying half, distributed to every replica so it
//!   can check record authenticity.
//! - `FolderId`: the BLAKE3 hash of the verifying key, the folder's stable
//!   identity in state reporting and logs.

use std::fmt;
use std::ops::Deref;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of the Ed25519 folder secret in bytes
pub const SECRET_SIZE: usize = 32;
/// Size of the derived folder identifier in bytes
pub const FOLDER_ID_SIZE: usize = 32;

/// Errors that can occur during secret/key operations
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
}

/// The folder's root signing key
///
/// # Examples
///
/// ```ignore
/// let secret = FolderSecret::generate();
/// let id = secret.folder_id();
/// let recovered = FolderSecret::from_hex(&secret.to_hex())?;
/// assert_eq!(recovered.folder_id(), id);
/// ```
#[derive(Clone)]
pub struct FolderSecret(SigningKey);

impl fmt::Debug for FolderSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FolderSecret").field(&"<redacted>").finish()
    }
}

impl FolderSecret {
    /// Generate a new random folder secret using the system RNG
    pub fn generate() -> Self {
        let mut buff = [0u8; SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(SigningKey::from_bytes(&buff))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0u8; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(Self(SigningKey::from_bytes(&buff)))
    }

    /// Parse a folder secret from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, SecretError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0u8; SECRET_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("folder secret hex decode error"))?;
        Ok(Self(SigningKey::from_bytes(&buff)))
    }

    /// Convert the secret to a hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// The verifying half of the secret
    pub fn public(&self) -> FolderKey {
        FolderKey(self.0.verifying_key())
    }

    /// The folder identifier derived from the verifying key
    pub fn folder_id(&self) -> FolderId {
        self.public().folder_id()
    }

    /// Sign a payload with the folder secret
    pub fn sign(&self, payload: &[u8]) -> Signature {
        self.0.sign(payload)
    }
}

impl Serialize for FolderSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FolderSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        FolderSecret::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// The verifying key of a folder, used to check record authenticity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderKey(VerifyingKey);

impl Deref for FolderKey {
    type Target = VerifyingKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FolderKey {
    /// Parse a folder key from raw bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not encode a valid Ed25519 point.
    pub fn from_bytes(bytes: &[u8; SECRET_SIZE]) -> Result<Self, SecretError> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| anyhow::anyhow!("invalid folder verifying key"))?;
        Ok(Self(key))
    }

    pub fn to_bytes(&self) -> [u8; SECRET_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Derive the stable folder identifier from this key
    pub fn folder_id(&self) -> FolderId {
        FolderId(*blake3::hash(&self.to_bytes()).as_bytes())
    }
}

/// Stable identifier of one shared folder
///
/// Derived deterministically from the folder secret; used as the key for
/// state reporting and as the folder's identity in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderId([u8; FOLDER_ID_SIZE]);

impl FolderId {
    pub fn as_bytes(&self) -> &[u8; FOLDER_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form for logs
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FolderId({})", self.to_hex())
    }
}
