//! Chunk acquisition engine
//!
//! Tracks which chunks are still missing locally, which ready peer holds
//! what, and keeps a bounded pipeline of sub-chunk block requests to every
//! peer that currently unchokes us. Received fragments are reassembled
//! here; a completed chunk is handed back to the folder group for the
//! storage commit.
//!
//! Selection policy: rarest-first over missing chunks (fewest known remote
//! holders first, ties broken by first-discovered order), with at most
//! `max_requests_per_peer` requests outstanding per peer.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

use common::prelude::{ChunkId, Message, Meta};

use crate::config::TransferLimits;
use crate::peer::{PeerDigest, PeerHandle};

/// One outstanding sub-chunk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockRef {
    chunk: ChunkId,
    offset: u32,
    size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentState {
    Missing,
    Requested,
    Received,
}

/// Reassembly state of one chunk still missing locally
#[derive(Debug)]
struct MissingChunk {
    size: u32,
    buffer: Vec<u8>,
    fragments: Vec<FragmentState>,
    /// Known remote holders, for rarest-first ordering
    owners: HashSet<PeerDigest>,
    /// First-discovered order, the rarest-first tie break
    discovered: u64,
}

impl MissingChunk {
    fn new(size: u32, fragment_size: u32, discovered: u64) -> Self {
        let fragment_count = (size as usize).div_ceil(fragment_size as usize).max(1);
        Self {
            size,
            buffer: vec![0u8; size as usize],
            fragments: vec![FragmentState::Missing; fragment_count],
            owners: HashSet::new(),
            discovered,
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments
            .iter()
            .all(|frag| *frag == FragmentState::Received)
    }
}

/// Per-peer download state
#[derive(Debug)]
struct RemoteState {
    peer: PeerHandle,
    /// The peer currently refuses our requests; the initial state
    choking_us: bool,
    /// We have declared Interested to this peer
    interesting: bool,
    available: HashSet<ChunkId>,
    requests: VecDeque<BlockRef>,
}

impl RemoteState {
    fn new(peer: PeerHandle) -> Self {
        Self {
            peer,
            choking_us: true,
            interesting: false,
            available: HashSet::new(),
            requests: VecDeque::new(),
        }
    }
}

/// Heartbeat snapshot of one peer's download state
#[derive(Debug, Clone, Copy)]
pub struct DownloadPeerState {
    pub peer_choking: bool,
    pub am_interested: bool,
    pub outstanding: usize,
}

#[derive(Debug)]
pub struct Downloader {
    limits: TransferLimits,
    missing: HashMap<ChunkId, MissingChunk>,
    peers: HashMap<PeerDigest, RemoteState>,
    next_discovery: u64,
}

impl Downloader {
    pub fn new(limits: TransferLimits) -> Self {
        Self {
            limits,
            missing: HashMap::new(),
            peers: HashMap::new(),
            next_discovery: 0,
        }
    }

    /// Start tracking a ready peer
    pub fn track_remote(&mut self, peer: PeerHandle) {
        self.peers
            .entry(peer.digest())
            .or_insert_with(|| RemoteState::new(peer));
    }

    /// Stop tracking a peer; its in-flight requests return to the pool
    /// and stay eligible for other peers
    pub fn untrack_remote(&mut self, digest: PeerDigest) {
        let Some(peer) = self.peers.remove(&digest) else {
            return;
        };
        requeue_requests(&peer.requests, &mut self.missing, &self.limits);
        for missing in self.missing.values_mut() {
            missing.owners.remove(&digest);
        }
    }

    /// Record which chunks of a record are already satisfied locally
    ///
    /// Present chunks are retracted from the want set; absent ones become
    /// wanted and eligible for request scheduling.
    pub fn notify_local_meta(&mut self, meta: &Meta, bitfield: &common::prelude::Bitfield) {
        for (idx, chunk) in meta.chunks.iter().enumerate() {
            if bitfield.get(idx) {
                self.notify_local_chunk(chunk.id);
            } else {
                self.add_missing(chunk.id, chunk.size);
            }
        }
    }

    /// A chunk is now local: drop the want and every in-flight request
    /// for it, across all peers
    pub fn notify_local_chunk(&mut self, chunk: ChunkId) {
        self.missing.remove(&chunk);
        for peer in self.peers.values_mut() {
            peer.requests.retain(|request| request.chunk != chunk);
        }
    }

    /// A peer announced it holds a chunk
    pub fn notify_remote_chunk(&mut self, digest: PeerDigest, chunk: ChunkId) {
        let Some(peer) = self.peers.get_mut(&digest) else {
            return;
        };
        peer.available.insert(chunk);
        if let Some(missing) = self.missing.get_mut(&chunk) {
            missing.owners.insert(digest);
        }
    }

    /// The peer refuses further requests; in-flight ones return to the pool
    pub fn handle_choke(&mut self, digest: PeerDigest) {
        let Some(peer) = self.peers.get_mut(&digest) else {
            return;
        };
        peer.choking_us = true;
        let abandoned = std::mem::take(&mut peer.requests);
        requeue_requests(&abandoned, &mut self.missing, &self.limits);
    }

    pub fn handle_unchoke(&mut self, digest: PeerDigest) {
        if let Some(peer) = self.peers.get_mut(&digest) {
            peer.choking_us = false;
        }
    }

    /// The peer refused one block request
    pub fn handle_reject(&mut self, digest: PeerDigest, chunk: ChunkId, offset: u32, size: u32) {
        let rejected = BlockRef {
            chunk,
            offset,
            size,
        };
        let Some(peer) = self.peers.get_mut(&digest) else {
            return;
        };
        if let Some(pos) = peer.requests.iter().position(|request| *request == rejected) {
            peer.requests.remove(pos);
            requeue_requests(
                &VecDeque::from([rejected]),
                &mut self.missing,
                &self.limits,
            );
        }
    }

    /// Apply a received fragment
    ///
    /// Returns the fully reassembled chunk once its last fragment lands;
    /// at that point every outstanding request for it, on every peer, has
    /// been cleared.
    pub fn put_block(
        &mut self,
        origin: PeerDigest,
        chunk: ChunkId,
        offset: u32,
        data: &[u8],
    ) -> Option<(ChunkId, Bytes)> {
        let Some(peer) = self.peers.get_mut(&origin) else {
            tracing::debug!(peer = %origin, %chunk, "block from untracked peer, ignoring");
            return None;
        };
        if let Some(pos) = peer.requests.iter().position(|request| {
            request.chunk == chunk && request.offset == offset && request.size as usize == data.len()
        }) {
            peer.requests.remove(pos);
        } else {
            tracing::debug!(peer = %origin, %chunk, offset, "unsolicited block");
        }

        let Some(missing) = self.missing.get_mut(&chunk) else {
            tracing::debug!(%chunk, "block for a chunk no longer wanted");
            return None;
        };

        let fragment_size = self.limits.fragment_size;
        let end = offset as usize + data.len();
        let aligned = offset % fragment_size == 0;
        let expected = (missing.size - offset.min(missing.size)).min(fragment_size) as usize;
        if !aligned || end > missing.size as usize || data.len() != expected {
            tracing::warn!(peer = %origin, %chunk, offset, len = data.len(), "malformed block, dropping");
            let idx = (offset / fragment_size) as usize;
            if let Some(frag) = missing.fragments.get_mut(idx) {
                if *frag == FragmentState::Requested {
                    *frag = FragmentState::Missing;
                }
            }
            return None;
        }

        let idx = (offset / fragment_size) as usize;
        missing.buffer[offset as usize..end].copy_from_slice(data);
        missing.fragments[idx] = FragmentState::Received;

        if !missing.is_complete() {
            return None;
        }

        let missing = self.missing.remove(&chunk).expect("present above");
        for peer in self.peers.values_mut() {
            peer.requests.retain(|request| request.chunk != chunk);
        }
        tracing::debug!(%chunk, size = missing.size, "chunk reassembled");
        Some((chunk, Bytes::from(missing.buffer)))
    }

    /// Put a chunk back into the want set after a failed commit
    pub fn restore_missing(&mut self, chunk: ChunkId, size: u32) {
        self.add_missing(chunk, size);
    }

    /// Re-evaluate interest declarations and fill request pipelines
    ///
    /// Call after any event that changes the want set, peer availability,
    /// or choke state. Peers are visited in digest order so scheduling is
    /// deterministic.
    pub fn maintain(&mut self) {
        let mut digests: Vec<PeerDigest> = self.peers.keys().copied().collect();
        digests.sort();
        for digest in digests {
            let peer = self.peers.get_mut(&digest).expect("tracked");
            update_interest(peer, &self.missing);
            fill_requests(peer, &mut self.missing, &self.limits);
        }
    }

    pub fn is_missing(&self, chunk: &ChunkId) -> bool {
        self.missing.contains_key(chunk)
    }

    pub fn peer_state(&self, digest: &PeerDigest) -> Option<DownloadPeerState> {
        self.peers.get(digest).map(|peer| DownloadPeerState {
            peer_choking: peer.choking_us,
            am_interested: peer.interesting,
            outstanding: peer.requests.len(),
        })
    }

    fn add_missing(&mut self, chunk: ChunkId, size: u32) {
        if size == 0 || self.missing.contains_key(&chunk) {
            return;
        }
        let mut missing = MissingChunk::new(size, self.limits.fragment_size, self.next_discovery);
        self.next_discovery += 1;
        for (digest, peer) in &self.peers {
            if peer.available.contains(&chunk) {
                missing.owners.insert(*digest);
            }
        }
        self.missing.insert(chunk, missing);
    }
}

/// Abandoned requests go back to the fragment pool for reissue elsewhere
fn requeue_requests(
    requests: &VecDeque<BlockRef>,
    missing: &mut HashMap<ChunkId, MissingChunk>,
    limits: &TransferLimits,
) {
    for request in requests {
        let Some(chunk) = missing.get_mut(&request.chunk) else {
            continue;
        };
        let idx = (request.offset / limits.fragment_size) as usize;
        if let Some(frag) = chunk.fragments.get_mut(idx) {
            if *frag == FragmentState::Requested {
                *frag = FragmentState::Missing;
            }
        }
    }
}

/// Declare or retract interest as the overlap between the peer's
/// availability and our want set changes
fn update_interest(peer: &mut RemoteState, missing: &HashMap<ChunkId, MissingChunk>) {
    let wanted = peer
        .available
        .iter()
        .any(|chunk| missing.contains_key(chunk));
    if wanted != peer.interesting {
        peer.interesting = wanted;
        peer.peer.send(if wanted {
            Message::Interested
        } else {
            Message::NotInterested
        });
    }
}

fn fill_requests(
    peer: &mut RemoteState,
    missing: &mut HashMap<ChunkId, MissingChunk>,
    limits: &TransferLimits,
) {
    if peer.choking_us {
        return;
    }
    while peer.requests.len() < limits.max_requests_per_peer {
        // rarest-first among chunks this peer can serve
        let candidate = missing
            .iter()
            .filter(|(chunk, state)| {
                peer.available.contains(chunk)
                    && state
                        .fragments
                        .iter()
                        .any(|frag| *frag == FragmentState::Missing)
            })
            .min_by_key(|(_, state)| (state.owners.len(), state.discovered))
            .map(|(chunk, _)| *chunk);
        let Some(chunk) = candidate else {
            break;
        };

        let state = missing.get_mut(&chunk).expect("candidate exists");
        let idx = state
            .fragments
            .iter()
            .position(|frag| *frag == FragmentState::Missing)
            .expect("candidate has a missing fragment");
        state.fragments[idx] = FragmentState::Requested;

        let offset = idx as u32 * limits.fragment_size;
        let size = (state.size - offset).min(limits.fragment_size);
        peer.requests.push_back(BlockRef {
            chunk,
            offset,
            size,
        });
        peer.peer.send(Message::BlockRequest {
            chunk,
            offset,
            size,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::meta::{ChunkRef, FileAttrs};
    use common::prelude::Bitfield;

    fn limits() -> TransferLimits {
        TransferLimits {
            max_requests_per_peer: 2,
            fragment_size: 4,
            ..TransferLimits::default()
        }
    }

    fn peer(n: u8) -> (PeerHandle, flume::Receiver<Message>) {
        PeerHandle::new(
            PeerDigest::from_bytes([n; 32]),
            format!("127.0.0.1:{}", 1000 + n as u16).parse().unwrap(),
            format!("peer-{}", n),
        )
    }

    fn meta_of(chunks: &[&[u8]]) -> Meta {
        Meta {
            path: "file".into(),
            revision: 1,
            chunks: chunks
                .iter()
                .map(|data| ChunkRef {
                    id: ChunkId::of(data),
                    size: data.len() as u32,
                })
                .collect(),
            attrs: FileAttrs::default(),
        }
    }

    fn drain(rx: &flume::Receiver<Message>) -> Vec<Message> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_no_requests_while_choked() {
        let mut downloader = Downloader::new(limits());
        let (handle, rx) = peer(1);
        let meta = meta_of(&[b"abcd"]);

        downloader.track_remote(handle);
        downloader.notify_local_meta(&meta, &Bitfield::new(1));
        downloader.notify_remote_chunk(PeerDigest::from_bytes([1; 32]), meta.chunks[0].id);
        downloader.maintain();

        // interest is declared, but no requests go out under choke
        assert_eq!(drain(&rx), vec![Message::Interested]);
    }

    #[test]
    fn test_requests_after_unchoke_with_backpressure() {
        let mut downloader = Downloader::new(limits());
        let (handle, rx) = peer(1);
        let digest = handle.digest();
        // 10 bytes over 4-byte fragments: 3 fragments, limit 2
        let meta = meta_of(&[b"0123456789"]);
        let chunk = meta.chunks[0].id;

        downloader.track_remote(handle);
        downloader.notify_local_meta(&meta, &Bitfield::new(1));
        downloader.notify_remote_chunk(digest, chunk);
        downloader.handle_unchoke(digest);
        downloader.maintain();

        let sent = drain(&rx);
        assert_eq!(
            sent,
            vec![
                Message::Interested,
                Message::BlockRequest {
                    chunk,
                    offset: 0,
                    size: 4
                },
                Message::BlockRequest {
                    chunk,
                    offset: 4,
                    size: 4
                },
            ]
        );
        assert_eq!(downloader.peer_state(&digest).unwrap().outstanding, 2);

        // completing one fragment frees a slot for the short tail
        assert!(downloader.put_block(digest, chunk, 0, b"0123").is_none());
        downloader.maintain();
        assert_eq!(
            drain(&rx),
            vec![Message::BlockRequest {
                chunk,
                offset: 8,
                size: 2
            }]
        );
    }

    #[test]
    fn test_rarest_first_selection() {
        let mut downloader = Downloader::new(TransferLimits {
            max_requests_per_peer: 1,
            fragment_size: 4,
            ..TransferLimits::default()
        });
        let (handle_a, rx_a) = peer(1);
        let (handle_b, _rx_b) = peer(2);
        let digest_a = handle_a.digest();
        let digest_b = handle_b.digest();
        let meta = meta_of(&[b"aaaa", b"bbbb"]);
        let (rare, popular) = (meta.chunks[0].id, meta.chunks[1].id);

        downloader.track_remote(handle_a);
        downloader.track_remote(handle_b);
        downloader.notify_local_meta(&meta, &Bitfield::new(2));
        // peer A holds both chunks, peer B only the popular one
        downloader.notify_remote_chunk(digest_a, rare);
        downloader.notify_remote_chunk(digest_a, popular);
        downloader.notify_remote_chunk(digest_b, popular);
        downloader.handle_unchoke(digest_a);
        downloader.maintain();

        let requested: Vec<Message> = drain(&rx_a)
            .into_iter()
            .filter(|msg| matches!(msg, Message::BlockRequest { .. }))
            .collect();
        assert_eq!(
            requested,
            vec![Message::BlockRequest {
                chunk: rare,
                offset: 0,
                size: 4
            }]
        );
    }

    #[test]
    fn test_choke_requeues_for_reissue() {
        let mut downloader = Downloader::new(limits());
        let (handle, rx) = peer(1);
        let digest = handle.digest();
        let meta = meta_of(&[b"abcd"]);
        let chunk = meta.chunks[0].id;

        downloader.track_remote(handle);
        downloader.notify_local_meta(&meta, &Bitfield::new(1));
        downloader.notify_remote_chunk(digest, chunk);
        downloader.handle_unchoke(digest);
        downloader.maintain();
        drain(&rx);

        downloader.handle_choke(digest);
        assert_eq!(downloader.peer_state(&digest).unwrap().outstanding, 0);

        // the abandoned fragment is re-requested once unchoked again
        downloader.handle_unchoke(digest);
        downloader.maintain();
        assert_eq!(
            drain(&rx),
            vec![Message::BlockRequest {
                chunk,
                offset: 0,
                size: 4
            }]
        );
    }

    #[test]
    fn test_completion_clears_all_peers() {
        let mut downloader = Downloader::new(limits());
        let (handle_a, rx_a) = peer(1);
        let (handle_b, rx_b) = peer(2);
        let digest_a = handle_a.digest();
        let digest_b = handle_b.digest();
        let meta = meta_of(&[b"01234567"]);
        let chunk = meta.chunks[0].id;

        downloader.track_remote(handle_a);
        downloader.track_remote(handle_b);
        downloader.notify_local_meta(&meta, &Bitfield::new(1));
        downloader.notify_remote_chunk(digest_a, chunk);
        downloader.notify_remote_chunk(digest_b, chunk);
        downloader.handle_unchoke(digest_a);
        downloader.handle_unchoke(digest_b);
        downloader.maintain();
        drain(&rx_a);
        drain(&rx_b);

        assert!(downloader.put_block(digest_a, chunk, 0, b"0123").is_none());
        let (done, data) = downloader.put_block(digest_a, chunk, 4, b"4567").unwrap();
        assert_eq!(done, chunk);
        assert_eq!(&data[..], b"01234567");
        assert!(chunk.matches(&data));

        assert!(!downloader.is_missing(&chunk));
        assert_eq!(downloader.peer_state(&digest_a).unwrap().outstanding, 0);
        assert_eq!(downloader.peer_state(&digest_b).unwrap().outstanding, 0);
    }

    #[test]
    fn test_local_chunk_retracts_want() {
        let mut downloader = Downloader::new(limits());
        let (handle, rx) = peer(1);
        let digest = handle.digest();
        let meta = meta_of(&[b"abcd"]);
        let chunk = meta.chunks[0].id;

        downloader.track_remote(handle);
        downloader.notify_local_meta(&meta, &Bitfield::new(1));
        downloader.notify_remote_chunk(digest, chunk);
        downloader.handle_unchoke(digest);
        downloader.maintain();
        drain(&rx);

        // indexed locally elsewhere: cancel the in-flight request
        downloader.notify_local_chunk(chunk);
        assert!(!downloader.is_missing(&chunk));
        assert_eq!(downloader.peer_state(&digest).unwrap().outstanding, 0);

        downloader.maintain();
        assert_eq!(drain(&rx), vec![Message::NotInterested]);
    }

    #[test]
    fn test_untracked_peer_block_ignored() {
        let mut downloader = Downloader::new(limits());
        let meta = meta_of(&[b"abcd"]);
        downloader.notify_local_meta(&meta, &Bitfield::new(1));
        assert!(downloader
            .put_block(PeerDigest::from_bytes([9; 32]), meta.chunks[0].id, 0, b"abcd")
            .is_none());
        assert!(downloader.is_missing(&meta.chunks[0].id));
    }
}
