//! Metadata acquisition engine
//!
//! Reacts to remote `HaveMeta` announcements: requests any revision that
//! would supersede what the local index holds, verifies and commits the
//! replies, and folds the bitfields peers attach into the chunk
//! downloader's availability map.

use std::collections::HashMap;

use common::prelude::{Bitfield, FolderKey, Message, PathRevision, SignedMeta};

use crate::peer::{PeerDigest, PeerHandle};
use crate::store::{MetaAccept, MetaStore, StoreError};

use super::downloader::Downloader;

/// Last advertisement seen per peer and path
#[derive(Debug)]
struct RemoteMeta {
    revision: PathRevision,
    bitfield: Bitfield,
}

#[derive(Debug, Default)]
pub struct MetaDownloader {
    remote: HashMap<PeerDigest, HashMap<String, RemoteMeta>>,
}

impl MetaDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn untrack_remote(&mut self, digest: PeerDigest) {
        self.remote.remove(&digest);
    }

    /// Handle a remote announcement of a record revision
    ///
    /// A revision newer than the local one (or for an unknown path) is
    /// requested from the announcing peer. An announcement of the revision
    /// we already hold carries fresh availability only; its bitfield is
    /// folded into the chunk downloader.
    pub async fn handle_have_meta(
        &mut self,
        peer: &PeerHandle,
        revision: PathRevision,
        bitfield: Bitfield,
        meta: &dyn MetaStore,
        downloader: &mut Downloader,
    ) -> Result<(), StoreError> {
        let local = meta.get_by_path(&revision.path).await?;
        let wanted = match &local {
            None => true,
            Some(stored) => revision.supersedes(&stored.path_revision()),
        };

        if wanted {
            tracing::debug!(peer = %peer.digest(), %revision, "requesting advertised record");
            peer.send(Message::MetaRequest {
                revision: revision.clone(),
            });
        } else if let Some(stored) = &local {
            if stored.path_revision() == revision {
                fold_availability(peer.digest(), stored, &bitfield, downloader);
            }
        }

        self.remote.entry(peer.digest()).or_default().insert(
            revision.path.clone(),
            RemoteMeta {
                revision,
                bitfield,
            },
        );
        Ok(())
    }

    /// Verify and commit a record a peer sent us
    ///
    /// Returns the record when it was accepted as the new current revision
    /// for its path, so the folder group can re-index and re-announce it.
    /// Unverifiable or stale records are dropped.
    pub async fn handle_meta_reply(
        &mut self,
        peer: &PeerHandle,
        smeta: SignedMeta,
        bitfield: Bitfield,
        key: &FolderKey,
        meta: &dyn MetaStore,
        downloader: &mut Downloader,
    ) -> Result<Option<SignedMeta>, StoreError> {
        if let Err(err) = smeta.verify(key) {
            tracing::warn!(peer = %peer.digest(), %err, "record failed signature verification, dropping");
            return Ok(None);
        }

        match meta.put_meta(smeta.clone()).await? {
            MetaAccept::Accepted => {
                fold_availability(peer.digest(), &smeta, &bitfield, downloader);
                self.remote.entry(peer.digest()).or_default().insert(
                    smeta.meta().path.clone(),
                    RemoteMeta {
                        revision: smeta.path_revision(),
                        bitfield,
                    },
                );
                Ok(Some(smeta))
            }
            MetaAccept::Superseded => {
                tracing::debug!(peer = %peer.digest(), revision = %smeta.path_revision(), "stale record, dropping");
                Ok(None)
            }
        }
    }

    /// Replay a peer's recorded availability into the chunk downloader
    ///
    /// Used when a record is indexed locally after the announcements for
    /// it were already received.
    pub fn replay_availability(&self, smeta: &SignedMeta, downloader: &mut Downloader) {
        let revision = smeta.path_revision();
        for (digest, records) in &self.remote {
            if let Some(remote) = records.get(&revision.path) {
                if remote.revision == revision {
                    fold_availability(*digest, smeta, &remote.bitfield, downloader);
                }
            }
        }
    }
}

/// Mark each chunk the bitfield claims as held by the peer
fn fold_availability(
    digest: PeerDigest,
    smeta: &SignedMeta,
    bitfield: &Bitfield,
    downloader: &mut Downloader,
) {
    let chunks = &smeta.meta().chunks;
    for idx in bitfield.iter_ones() {
        if let Some(chunk) = chunks.get(idx) {
            downloader.notify_remote_chunk(digest, chunk.id);
        }
    }
}
