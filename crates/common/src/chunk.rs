use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of a chunk identifier (BLAKE3 hash) in bytes
pub const CHUNK_ID_SIZE: usize = 32;

/// Errors that can occur while parsing chunk identifiers
#[derive(Debug, thiserror::Error)]
pub enum ChunkIdError {
    #[error("chunk id hex decode error")]
    Hex,
}

/// Content address of one chunk
///
/// Globally unique per content: two chunks with the same bytes have the
/// same id. Used as the key into chunk storage and as the unit of transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId([u8; CHUNK_ID_SIZE]);

impl ChunkId {
    /// Compute the id of a chunk from its bytes
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; CHUNK_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex: &str) -> Result<Self, ChunkIdError> {
        let mut buff = [0u8; CHUNK_ID_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|_| ChunkIdError::Hex)?;
        Ok(Self(buff))
    }

    /// Check that `data` actually hashes to this id
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of(data) == *self
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form for logs
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.to_hex())
    }
}
