//! Versioned file metadata records
//!
//! One `Meta` describes one path at one revision: its chunk list (content
//! hashes plus sizes) and file attributes. Records never mutate; a change
//! to a path is a new record at a higher revision that supersedes the old
//! one. `SignedMeta` carries the Ed25519 proof that the record was authored
//! by the folder secret holder.

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkId;
use crate::secret::{FolderKey, FolderSecret};

/// Errors that can occur while building or verifying metadata records
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("meta encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("signature verification failed for {0:?}")]
    BadSignature(PathRevision),
}

/// A (path, version) pair locating one record in a per-path history
///
/// For the same path, a revision either supersedes, is superseded by, or
/// conflicts with another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathRevision {
    pub path: String,
    pub revision: u64,
}

impl PathRevision {
    pub fn new(path: impl Into<String>, revision: u64) -> Self {
        Self {
            path: path.into(),
            revision,
        }
    }

    /// Whether this revision replaces `other` for the same path
    pub fn supersedes(&self, other: &PathRevision) -> bool {
        self.path == other.path && self.revision > other.revision
    }

    /// Same path, same revision, but not necessarily the same record
    pub fn conflicts(&self, other: &PathRevision) -> bool {
        self.path == other.path && self.revision == other.revision
    }
}

impl std::fmt::Display for PathRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.revision)
    }
}

/// Reference to one chunk of a record's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ChunkId,
    pub size: u32,
}

/// File attributes carried by a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttrs {
    pub size: u64,
    pub mtime: i64,
    pub executable: bool,
}

/// One metadata record: a path at a revision with its chunk list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub path: String,
    pub revision: u64,
    pub chunks: Vec<ChunkRef>,
    pub attrs: FileAttrs,
}

impl Meta {
    pub fn path_revision(&self) -> PathRevision {
        PathRevision::new(self.path.clone(), self.revision)
    }
}

/// A metadata record plus its authenticity proof
///
/// Immutable once created. Storage accepts it only if the proof verifies
/// against the folder key and the revision does not regress the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMeta {
    meta: Meta,
    signature: ed25519_dalek::Signature,
}

impl SignedMeta {
    /// Sign a record with the folder secret
    pub fn new(meta: Meta, secret: &FolderSecret) -> Result<Self, MetaError> {
        let payload = bincode::serialize(&meta)?;
        let signature = secret.sign(&payload);
        Ok(Self { meta, signature })
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn path_revision(&self) -> PathRevision {
        self.meta.path_revision()
    }

    /// Check the record's proof against the folder key
    pub fn verify(&self, key: &FolderKey) -> Result<(), MetaError> {
        let payload = bincode::serialize(&self.meta)?;
        key.verify_strict(&payload, &self.signature)
            .map_err(|_| MetaError::BadSignature(self.path_revision()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(path: &str, revision: u64) -> Meta {
        Meta {
            path: path.to_string(),
            revision,
            chunks: vec![ChunkRef {
                id: ChunkId::of(path.as_bytes()),
                size: 4,
            }],
            attrs: FileAttrs::default(),
        }
    }

    #[test]
    fn test_revision_ordering() {
        let r1 = PathRevision::new("a/b", 1);
        let r2 = PathRevision::new("a/b", 2);
        let other = PathRevision::new("a/c", 2);

        assert!(r2.supersedes(&r1));
        assert!(!r1.supersedes(&r2));
        assert!(!r2.supersedes(&r2));
        assert!(r2.conflicts(&r2));
        // revisions of different paths are unrelated
        assert!(!other.supersedes(&r1));
        assert!(!other.conflicts(&r2));
    }

    #[test]
    fn test_sign_verify() {
        let secret = FolderSecret::generate();
        let smeta = SignedMeta::new(record("a/b", 1), &secret).unwrap();
        assert!(smeta.verify(&secret.public()).is_ok());

        // a different folder's key must not verify the record
        let other = FolderSecret::generate();
        assert!(matches!(
            smeta.verify(&other.public()),
            Err(MetaError::BadSignature(_))
        ));
    }

    #[test]
    fn test_signed_meta_serde_round_trip() {
        let secret = FolderSecret::generate();
        let smeta = SignedMeta::new(record("dir/file.txt", 7), &secret).unwrap();
        let bytes = bincode::serialize(&smeta).unwrap();
        let back: SignedMeta = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, smeta);
        assert!(back.verify(&secret.public()).is_ok());
    }
}
