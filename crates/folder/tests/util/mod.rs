//! Two-replica harness: a pair of folder groups over independent storage,
//! wired back to back. Messages are pumped between them synchronously, so
//! a test observes every intermediate state without timing games.

use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use common::meta::{ChunkRef, FileAttrs};
use common::prelude::{ChunkId, FolderSecret, Message, Meta, SignedMeta};
use folder::config::{FolderParams, TransferLimits};
use folder::group::FolderGroup;
use folder::peer::{PeerDigest, PeerHandle};
use folder::state::MemoryStateSink;
use folder::store::{ChunkStore, MemoryChunkStore, MemoryMetaStore, MetaStore};

pub struct Replica {
    pub group: FolderGroup,
    pub meta: MemoryMetaStore,
    pub chunks: MemoryChunkStore,
    pub sink: MemoryStateSink,
}

pub struct Pair {
    pub a: Replica,
    pub b: Replica,
    pub secret: FolderSecret,
    pub digest_a: PeerDigest,
    pub digest_b: PeerDigest,
    a_outbox: flume::Receiver<Message>,
    b_outbox: flume::Receiver<Message>,
    _dir: TempDir,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn replica(
    root: &std::path::Path,
    secret: FolderSecret,
    limits: TransferLimits,
) -> Replica {
    init_tracing();
    let meta = MemoryMetaStore::new();
    let chunks = MemoryChunkStore::new();
    let sink = MemoryStateSink::new();
    let params = FolderParams {
        path: root.join("folder"),
        system_path: root.join("folder/.sys"),
        secret,
        limits,
    };
    let group = FolderGroup::new(
        params,
        Arc::new(meta.clone()),
        Arc::new(chunks.clone()),
        Arc::new(sink.clone()),
    )
    .await
    .unwrap();
    Replica {
        group,
        meta,
        chunks,
        sink,
    }
}

/// Two connected ready replicas of the same folder
pub async fn pair(limits: TransferLimits) -> Pair {
    let dir = tempfile::tempdir().unwrap();
    let secret = FolderSecret::generate();
    let mut a = replica(&dir.path().join("a"), secret.clone(), limits.clone()).await;
    let mut b = replica(&dir.path().join("b"), secret.clone(), limits).await;

    let digest_a = PeerDigest::from_bytes([0xaa; 32]);
    let digest_b = PeerDigest::from_bytes([0xbb; 32]);

    // each group holds a handle to the other; the handle's queue is the
    // wire this harness pumps
    let (b_as_seen_by_a, a_outbox) =
        PeerHandle::new(digest_b, "127.0.0.1:2002".parse().unwrap(), "replica-b");
    let (a_as_seen_by_b, b_outbox) =
        PeerHandle::new(digest_a, "127.0.0.1:2001".parse().unwrap(), "replica-a");

    assert!(a.group.attach(b_as_seen_by_a));
    assert!(b.group.attach(a_as_seen_by_b));
    a.group.handle_handshake(digest_b);
    b.group.handle_handshake(digest_a);

    Pair {
        a,
        b,
        secret,
        digest_a,
        digest_b,
        a_outbox,
        b_outbox,
        _dir: dir,
    }
}

impl Pair {
    /// Shuttle messages both ways until the swarm goes quiet
    pub async fn pump(&mut self) {
        loop {
            self.a.group.process_deferred().await.unwrap();
            self.b.group.process_deferred().await.unwrap();

            let mut moved = false;
            while let Ok(message) = self.a_outbox.try_recv() {
                moved = true;
                self.b
                    .group
                    .handle_message(self.digest_a, message)
                    .await
                    .unwrap();
                self.b.group.process_deferred().await.unwrap();
            }
            while let Ok(message) = self.b_outbox.try_recv() {
                moved = true;
                self.a
                    .group
                    .handle_message(self.digest_b, message)
                    .await
                    .unwrap();
                self.a.group.process_deferred().await.unwrap();
            }
            if !moved {
                break;
            }
        }
    }
}

/// Sign a record over the given chunk payloads
pub fn record(secret: &FolderSecret, path: &str, revision: u64, data: &[&[u8]]) -> SignedMeta {
    let chunks = data
        .iter()
        .map(|bytes| ChunkRef {
            id: ChunkId::of(bytes),
            size: bytes.len() as u32,
        })
        .collect();
    SignedMeta::new(
        Meta {
            path: path.to_string(),
            revision,
            chunks,
            attrs: FileAttrs::default(),
        },
        secret,
    )
    .unwrap()
}

/// Index a record on a replica, with its chunk payloads in local storage
pub async fn seed(replica: &mut Replica, smeta: &SignedMeta, data: &[&[u8]]) {
    for bytes in data {
        replica
            .chunks
            .put_chunk(&ChunkId::of(bytes), Bytes::copy_from_slice(bytes))
            .await
            .unwrap();
    }
    replica.meta.put_meta(smeta.clone()).await.unwrap();
    replica.group.handle_indexed_meta(smeta).await.unwrap();
}
