//! Metadata serving engine
//!
//! Announces the local index to peers and answers their record requests.
//! Every announcement carries the local availability bitfield for the
//! record so the receiving side learns chunk availability for free.

use common::prelude::{Bitfield, Message, PathRevision};

use crate::peer::PeerHandle;
use crate::store::{ChunkStore, MetaStore, StoreError};

#[derive(Debug, Default)]
pub struct MetaUploader;

impl MetaUploader {
    pub fn new() -> Self {
        Self
    }

    /// Announce every currently indexed record to a fresh peer
    pub async fn handle_handshake(
        &self,
        peer: &PeerHandle,
        meta: &dyn MetaStore,
        chunks: &dyn ChunkStore,
    ) -> Result<(), StoreError> {
        let records = meta.get_meta().await?;
        tracing::debug!(peer = %peer.digest(), records = records.len(), "announcing index");
        for smeta in records {
            let bitfield = chunks.make_bitfield(smeta.meta()).await?;
            peer.send(Message::HaveMeta {
                revision: smeta.path_revision(),
                bitfield,
            });
        }
        Ok(())
    }

    /// Serve one record request; exact-revision lookups only
    pub async fn handle_meta_request(
        &self,
        peer: &PeerHandle,
        revision: PathRevision,
        meta: &dyn MetaStore,
        chunks: &dyn ChunkStore,
    ) -> Result<(), StoreError> {
        match meta.get_by_revision(&revision).await? {
            Some(smeta) => {
                let bitfield = chunks.make_bitfield(smeta.meta()).await?;
                peer.send(Message::MetaReply {
                    meta: smeta,
                    bitfield,
                });
            }
            None => {
                tracing::debug!(peer = %peer.digest(), %revision, "record not held");
                peer.send(Message::MetaMissing { revision });
            }
        }
        Ok(())
    }

    /// Announce a freshly indexed record to the given ready peers
    pub fn broadcast_meta(peers: &[PeerHandle], revision: &PathRevision, bitfield: &Bitfield) {
        for peer in peers {
            peer.send(Message::HaveMeta {
                revision: revision.clone(),
                bitfield: bitfield.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::meta::{ChunkRef, FileAttrs};
    use common::prelude::{ChunkId, FolderSecret, Meta, SignedMeta};

    use crate::peer::PeerDigest;
    use crate::store::{MemoryChunkStore, MemoryMetaStore};

    fn peer(n: u8) -> (PeerHandle, flume::Receiver<Message>) {
        PeerHandle::new(
            PeerDigest::from_bytes([n; 32]),
            format!("127.0.0.1:{}", 1000 + n as u16).parse().unwrap(),
            format!("peer-{}", n),
        )
    }

    fn record(secret: &FolderSecret, path: &str, revision: u64, data: &[&[u8]]) -> SignedMeta {
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

    fn drain(rx: &flume::Receiver<Message>) -> Vec<Message> {
        rx.try_iter().collect()
    }

    #[tokio::test]
    async fn test_handshake_announces_index() {
        let secret = FolderSecret::generate();
        let meta = MemoryMetaStore::new();
        let chunks = MemoryChunkStore::new();
        let uploader = MetaUploader::new();
        let (handle, rx) = peer(1);

        let r_a = record(&secret, "a", 1, &[b"one", b"two"]);
        let r_b = record(&secret, "b", 3, &[b"three"]);
        meta.put_meta(r_a.clone()).await.unwrap();
        meta.put_meta(r_b.clone()).await.unwrap();
        chunks
            .put_chunk(&ChunkId::of(b"two"), Bytes::from_static(b"two"))
            .await
            .unwrap();

        uploader.handle_handshake(&handle, &meta, &chunks).await.unwrap();

        let sent = drain(&rx);
        assert_eq!(sent.len(), 2);
        let mut expect_a = Bitfield::new(2);
        expect_a.set(1, true);
        assert_eq!(
            sent[0],
            Message::HaveMeta {
                revision: r_a.path_revision(),
                bitfield: expect_a
            }
        );
        assert_eq!(
            sent[1],
            Message::HaveMeta {
                revision: r_b.path_revision(),
                bitfield: Bitfield::new(1)
            }
        );
    }

    #[tokio::test]
    async fn test_exact_revision_lookup() {
        let secret = FolderSecret::generate();
        let meta = MemoryMetaStore::new();
        let chunks = MemoryChunkStore::new();
        let uploader = MetaUploader::new();
        let (handle, rx) = peer(1);

        let r1 = record(&secret, "a", 1, &[b"one"]);
        let r2 = record(&secret, "a", 2, &[b"two"]);
        meta.put_meta(r1.clone()).await.unwrap();
        meta.put_meta(r2.clone()).await.unwrap();

        // superseded revisions are still served for lagging peers
        uploader
            .handle_meta_request(&handle, r1.path_revision(), &meta, &chunks)
            .await
            .unwrap();
        assert_eq!(
            drain(&rx),
            vec![Message::MetaReply {
                meta: r1,
                bitfield: Bitfield::new(1)
            }]
        );

        uploader
            .handle_meta_request(&handle, PathRevision::new("a", 9), &meta, &chunks)
            .await
            .unwrap();
        assert_eq!(
            drain(&rx),
            vec![Message::MetaMissing {
                revision: PathRevision::new("a", 9)
            }]
        );
    }

    #[test]
    fn test_broadcast_reaches_all_given_peers() {
        let (handle_a, rx_a) = peer(1);
        let (handle_b, rx_b) = peer(2);
        let revision = PathRevision::new("a", 1);
        let bitfield = Bitfield::full(2);

        MetaUploader::broadcast_meta(&[handle_a, handle_b], &revision, &bitfield);

        for rx in [rx_a, rx_b] {
            assert_eq!(
                drain(&rx),
                vec![Message::HaveMeta {
                    revision: revision.clone(),
                    bitfield: bitfield.clone()
                }]
            );
        }
    }
}
