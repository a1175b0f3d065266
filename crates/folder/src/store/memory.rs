use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use common::prelude::{Bitfield, ChunkId, Meta, PathRevision, SignedMeta};

use super::{ChunkStore, MetaAccept, MetaStore, StoreError};

/// In-memory metadata index
#[derive(Debug, Clone, Default)]
pub struct MemoryMetaStore {
    inner: Arc<RwLock<MemoryMetaStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryMetaStoreInner {
    /// Current record per path
    current: HashMap<String, SignedMeta>,
    /// Every accepted record, addressable by exact revision
    history: HashMap<PathRevision, SignedMeta>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get_meta(&self) -> Result<Vec<SignedMeta>, StoreError> {
        let inner = self.inner.read();
        let mut records: Vec<SignedMeta> = inner.current.values().cloned().collect();
        records.sort_by(|a, b| a.meta().path.cmp(&b.meta().path));
        Ok(records)
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<SignedMeta>, StoreError> {
        Ok(self.inner.read().current.get(path).cloned())
    }

    async fn get_by_revision(
        &self,
        revision: &PathRevision,
    ) -> Result<Option<SignedMeta>, StoreError> {
        Ok(self.inner.read().history.get(revision).cloned())
    }

    async fn put_meta(&self, smeta: SignedMeta) -> Result<MetaAccept, StoreError> {
        let mut inner = self.inner.write();
        let revision = smeta.path_revision();

        if let Some(stored) = inner.current.get(&revision.path) {
            if !revision.supersedes(&stored.path_revision()) {
                return Ok(MetaAccept::Superseded);
            }
        }

        inner.history.insert(revision.clone(), smeta.clone());
        inner.current.insert(revision.path, smeta);
        Ok(MetaAccept::Accepted)
    }
}

/// In-memory content-addressed chunk store
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    chunks: Arc<RwLock<HashMap<ChunkId, Bytes>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn has_chunk(&self, id: &ChunkId) -> Result<bool, StoreError> {
        Ok(self.chunks.read().contains_key(id))
    }

    async fn chunk_size(&self, id: &ChunkId) -> Result<Option<u32>, StoreError> {
        Ok(self.chunks.read().get(id).map(|data| data.len() as u32))
    }

    async fn get_chunk(&self, id: &ChunkId) -> Result<Option<Bytes>, StoreError> {
        Ok(self.chunks.read().get(id).cloned())
    }

    async fn put_chunk(&self, id: &ChunkId, data: Bytes) -> Result<(), StoreError> {
        if !id.matches(&data) {
            return Err(StoreError::Integrity(*id));
        }
        self.chunks.write().insert(*id, data);
        Ok(())
    }

    async fn make_bitfield(&self, meta: &Meta) -> Result<Bitfield, StoreError> {
        let chunks = self.chunks.read();
        let mut bitfield = Bitfield::new(meta.chunks.len());
        for (idx, chunk) in meta.chunks.iter().enumerate() {
            if chunks.contains_key(&chunk.id) {
                bitfield.set(idx, true);
            }
        }
        Ok(bitfield)
    }
}
