use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

use common::prelude::{Bitfield, ChunkId, Meta, PathRevision, SignedMeta};

mod memory;

pub use memory::{MemoryChunkStore, MemoryMetaStore};

/// Errors surfaced by the storage contracts
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A chunk's bytes do not hash to its id. Scoped to the one record;
    /// never tears down the folder group.
    #[error("chunk {0} failed content verification")]
    Integrity(ChunkId),
    /// Disk or backend fault. Fatal to the folder group.
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// Outcome of offering a record to the metadata index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaAccept {
    /// The record is now the current one for its path
    Accepted,
    /// The stored revision is the same or newer; nothing changed
    Superseded,
}

/// Authoritative local store of versioned metadata records, keyed by path
///
/// The store is append-only plus supersede: `put_meta` accepts a record
/// only if its revision does not regress the stored revision for the path
/// (monotonic per path, idempotent on replays). Earlier accepted revisions
/// stay addressable by exact revision so peers lagging behind can still be
/// served.
#[async_trait]
pub trait MetaStore: Debug + Send + Sync {
    /// Snapshot of the current record for every indexed path
    async fn get_meta(&self) -> Result<Vec<SignedMeta>, StoreError>;

    /// Current record for a path, if any
    async fn get_by_path(&self, path: &str) -> Result<Option<SignedMeta>, StoreError>;

    /// Record at exactly this revision, if it was ever accepted
    async fn get_by_revision(
        &self,
        revision: &PathRevision,
    ) -> Result<Option<SignedMeta>, StoreError>;

    /// Offer a record; accepted iff it supersedes the stored revision
    /// (or the path is new). Authenticity is checked by the caller.
    async fn put_meta(&self, smeta: SignedMeta) -> Result<MetaAccept, StoreError>;
}

/// Authoritative local content-addressed chunk store
#[async_trait]
pub trait ChunkStore: Debug + Send + Sync {
    async fn has_chunk(&self, id: &ChunkId) -> Result<bool, StoreError>;

    /// Stored size of a chunk, if present
    async fn chunk_size(&self, id: &ChunkId) -> Result<Option<u32>, StoreError>;

    async fn get_chunk(&self, id: &ChunkId) -> Result<Option<Bytes>, StoreError>;

    /// Store a chunk. The bytes must hash to `id`, else
    /// `StoreError::Integrity`. Storing a chunk twice is a no-op.
    async fn put_chunk(&self, id: &ChunkId, data: Bytes) -> Result<(), StoreError>;

    /// Local availability bitfield for a record, one bit per chunk in
    /// block-list order
    async fn make_bitfield(&self, meta: &Meta) -> Result<Bitfield, StoreError>;
}
