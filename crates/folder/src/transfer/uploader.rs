//! Block serving engine
//!
//! Answers remote block requests from the chunk store and decides which
//! interested peers are allowed to request at all. The choke policy is a
//! strategy so alternative policies can be dropped in; the default grants
//! a fixed number of slots in first-interested order.

use std::collections::{HashMap, VecDeque};

use common::prelude::Message;

use crate::peer::{PeerDigest, PeerHandle};
use crate::store::{ChunkStore, StoreError};

/// Picks which interested peers get unchoked
///
/// `interested` is in first-interested order; implementations return the
/// digests to unchoke, everyone else gets choked.
pub trait ChokeStrategy: std::fmt::Debug + Send {
    fn select(&mut self, interested: &[PeerDigest], slots: usize) -> Vec<PeerDigest>;
}

/// Default policy: the first `slots` interested peers win
#[derive(Debug, Default)]
pub struct SlotLimit;

impl ChokeStrategy for SlotLimit {
    fn select(&mut self, interested: &[PeerDigest], slots: usize) -> Vec<PeerDigest> {
        interested.iter().take(slots).copied().collect()
    }
}

#[derive(Debug)]
struct UploadState {
    peer: PeerHandle,
    interested: bool,
    /// We refuse this peer's requests; the initial state
    choked: bool,
}

/// Heartbeat snapshot of one peer's upload state
#[derive(Debug, Clone, Copy)]
pub struct UploadPeerState {
    pub am_choking: bool,
    pub peer_interested: bool,
}

#[derive(Debug)]
pub struct Uploader {
    slots: usize,
    strategy: Box<dyn ChokeStrategy>,
    peers: HashMap<PeerDigest, UploadState>,
    /// Interested peers in the order they declared interest
    interest_order: VecDeque<PeerDigest>,
}

impl Uploader {
    pub fn new(slots: usize) -> Self {
        Self::with_strategy(slots, Box::new(SlotLimit))
    }

    pub fn with_strategy(slots: usize, strategy: Box<dyn ChokeStrategy>) -> Self {
        Self {
            slots,
            strategy,
            peers: HashMap::new(),
            interest_order: VecDeque::new(),
        }
    }

    pub fn register(&mut self, peer: PeerHandle) {
        self.peers.entry(peer.digest()).or_insert(UploadState {
            peer,
            interested: false,
            choked: true,
        });
    }

    /// Remove a departed peer; its slot may free up for another
    pub fn unregister(&mut self, digest: PeerDigest) {
        if self.peers.remove(&digest).is_some() {
            self.interest_order.retain(|d| *d != digest);
            self.rechoke();
        }
    }

    pub fn handle_interested(&mut self, digest: PeerDigest) {
        let Some(peer) = self.peers.get_mut(&digest) else {
            return;
        };
        if !peer.interested {
            peer.interested = true;
            self.interest_order.push_back(digest);
            self.rechoke();
        }
    }

    pub fn handle_not_interested(&mut self, digest: PeerDigest) {
        let Some(peer) = self.peers.get_mut(&digest) else {
            return;
        };
        if peer.interested {
            peer.interested = false;
            self.interest_order.retain(|d| *d != digest);
            self.rechoke();
        }
    }

    /// Serve one block request, or refuse it
    ///
    /// A request for an unknown chunk, a zero size, or a range past the
    /// chunk's end is answered with `BlockReject` and changes no transfer
    /// state. Returns the payload size served, 0 on reject.
    pub async fn handle_block_request(
        &mut self,
        digest: PeerDigest,
        chunk: common::prelude::ChunkId,
        offset: u32,
        size: u32,
        chunks: &dyn ChunkStore,
    ) -> Result<u64, StoreError> {
        let Some(peer) = self.peers.get(&digest) else {
            return Ok(0);
        };
        if peer.choked {
            // requests racing a Choke in flight are refused, not served
            peer.peer.send(Message::BlockReject {
                chunk,
                offset,
                size,
            });
            return Ok(0);
        }

        let data = chunks.get_chunk(&chunk).await?;
        let valid = data.as_ref().is_some_and(|data| {
            size != 0 && (offset as u64 + size as u64) <= data.len() as u64
        });
        if !valid {
            tracing::debug!(peer = %digest, %chunk, offset, size, "rejecting block request");
            peer.peer.send(Message::BlockReject {
                chunk,
                offset,
                size,
            });
            return Ok(0);
        }

        let data = data.expect("checked above");
        let payload = data.slice(offset as usize..(offset + size) as usize);
        let served = payload.len() as u64;
        peer.peer.send(Message::BlockReply {
            chunk,
            offset,
            data: payload.to_vec(),
        });
        Ok(served)
    }

    /// Announce a newly stored chunk to the given ready peers
    pub fn broadcast_chunk(peers: &[PeerHandle], chunk: common::prelude::ChunkId) {
        for peer in peers {
            peer.send(Message::HaveChunk { chunk });
        }
    }

    pub fn peer_state(&self, digest: &PeerDigest) -> Option<UploadPeerState> {
        self.peers.get(digest).map(|peer| UploadPeerState {
            am_choking: peer.choked,
            peer_interested: peer.interested,
        })
    }

    /// Re-run the choke policy and notify peers whose state flipped
    fn rechoke(&mut self) {
        let interested: Vec<PeerDigest> = self.interest_order.iter().copied().collect();
        let unchoked = self.strategy.select(&interested, self.slots);
        for (digest, peer) in self.peers.iter_mut() {
            let choke = !peer.interested || !unchoked.contains(digest);
            if choke != peer.choked {
                peer.choked = choke;
                peer.peer.send(if choke {
                    Message::Choke
                } else {
                    Message::Unchoke
                });
            }
        }
    }
}
