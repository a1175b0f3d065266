use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use common::prelude::{ChunkId, FolderId, FolderKey, Message, SignedMeta};

use crate::config::FolderParams;
use crate::error::FolderError;
use crate::peer::{PeerDigest, PeerHandle, PeerPhase, PeerSession};
use crate::state::StateSink;
use crate::stats::TrafficCounters;
use crate::store::{ChunkStore, MetaStore, StoreError};
use crate::transfer::{Downloader, MetaDownloader, MetaUploader, Uploader};

/// Events the folder group consumes, in arrival order
#[derive(Debug)]
pub enum FolderEvent {
    /// A connection claims membership; `reply` carries the verdict
    Attach {
        handle: PeerHandle,
        reply: flume::Sender<bool>,
    },
    Detach {
        digest: PeerDigest,
    },
    /// The transport finished the protocol handshake for this peer
    HandshakeSuccess {
        digest: PeerDigest,
    },
    /// One decoded message from an attached peer
    FromPeer {
        digest: PeerDigest,
        message: Message,
    },
    /// The local indexer committed a record
    MetaIndexed {
        smeta: SignedMeta,
    },
}

/// Peer-set changes, for anyone watching the swarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    Attached {
        digest: PeerDigest,
        endpoint: SocketAddr,
    },
    Ready {
        digest: PeerDigest,
    },
    Detached {
        digest: PeerDigest,
    },
}

/// Work queued to run after the current event, before the next one
#[derive(Debug)]
enum Deferred {
    /// Feed every indexed record through the indexed-record path
    ReplayIndex,
    /// Announce the full index to a peer that just became ready
    AnnounceTo(PeerDigest),
}

/// Cloneable submission handle to a running folder group
#[derive(Debug, Clone)]
pub struct FolderHandle {
    tx: flume::Sender<FolderEvent>,
}

impl FolderHandle {
    /// Offer a connection to the folder; `false` means rejected
    pub async fn attach(&self, handle: PeerHandle) -> Result<bool, FolderError> {
        let (reply, verdict) = flume::bounded(1);
        self.tx
            .send_async(FolderEvent::Attach { handle, reply })
            .await
            .map_err(|_| FolderError::ChannelClosed)?;
        verdict.recv_async().await.map_err(|_| FolderError::ChannelClosed)
    }

    pub async fn detach(&self, digest: PeerDigest) -> Result<(), FolderError> {
        self.send(FolderEvent::Detach { digest }).await
    }

    pub async fn handshake_success(&self, digest: PeerDigest) -> Result<(), FolderError> {
        self.send(FolderEvent::HandshakeSuccess { digest }).await
    }

    /// Deliver one decoded inbound message
    pub async fn deliver(&self, digest: PeerDigest, message: Message) -> Result<(), FolderError> {
        self.send(FolderEvent::FromPeer { digest, message }).await
    }

    /// Tell the folder a record was committed to the local index
    pub async fn notify_indexed(&self, smeta: SignedMeta) -> Result<(), FolderError> {
        self.send(FolderEvent::MetaIndexed { smeta }).await
    }

    async fn send(&self, event: FolderEvent) -> Result<(), FolderError> {
        self.tx
            .send_async(event)
            .await
            .map_err(|_| FolderError::ChannelClosed)
    }
}

/// Orchestrator for one replicated folder
///
/// Owns the four exchange engines and the peer set, routes every event
/// through them in arrival order, and reports state on a heartbeat. All
/// exchange state is confined to this task; the outside world talks to it
/// through a [`FolderHandle`].
pub struct FolderGroup {
    params: FolderParams,
    folder_id: FolderId,
    folder_key: FolderKey,

    meta: Arc<dyn MetaStore>,
    chunks: Arc<dyn ChunkStore>,

    downloader: Downloader,
    uploader: Uploader,
    meta_downloader: MetaDownloader,
    meta_uploader: MetaUploader,

    sessions: HashMap<PeerDigest, PeerSession>,
    endpoints: HashSet<SocketAddr>,

    state: Arc<dyn StateSink>,
    traffic: TrafficCounters,

    deferred: VecDeque<Deferred>,
    observers: Vec<flume::Sender<SwarmEvent>>,

    events_tx: flume::Sender<FolderEvent>,
    events_rx: flume::Receiver<FolderEvent>,
}

impl FolderGroup {
    /// Set up a folder group over its storage
    ///
    /// Creates the folder directories if needed and schedules a replay of
    /// the existing index, so engines start from what storage already
    /// holds.
    pub async fn new(
        params: FolderParams,
        meta: Arc<dyn MetaStore>,
        chunks: Arc<dyn ChunkStore>,
        state: Arc<dyn StateSink>,
    ) -> Result<Self, FolderError> {
        let params = FolderParams {
            limits: params.limits.sanitized(),
            ..params
        };
        tokio::fs::create_dir_all(&params.path).await?;
        tokio::fs::create_dir_all(&params.system_path).await?;

        let folder_id = params.secret.folder_id();
        let folder_key = params.secret.public();
        state
            .folder_state_set(
                &folder_id,
                "secret",
                serde_json::json!(params.secret.to_hex()),
            )
            .await;

        let (events_tx, events_rx) = flume::unbounded();
        let downloader = Downloader::new(params.limits.clone());
        let uploader = Uploader::new(params.limits.upload_slots);

        tracing::info!(folder = %folder_id, path = %params.path.display(), "folder group created");

        Ok(Self {
            params,
            folder_id,
            folder_key,
            meta,
            chunks,
            downloader,
            uploader,
            meta_downloader: MetaDownloader::new(),
            meta_uploader: MetaUploader::new(),
            sessions: HashMap::new(),
            endpoints: HashSet::new(),
            state,
            traffic: TrafficCounters::new(),
            deferred: VecDeque::from([Deferred::ReplayIndex]),
            observers: Vec::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn folder_id(&self) -> FolderId {
        self.folder_id
    }

    pub fn handle(&self) -> FolderHandle {
        FolderHandle {
            tx: self.events_tx.clone(),
        }
    }

    /// Watch peer-set changes; a dropped receiver unsubscribes itself
    pub fn subscribe(&mut self) -> flume::Receiver<SwarmEvent> {
        let (tx, rx) = flume::unbounded();
        self.observers.push(tx);
        rx
    }

    /// Drive the folder until shutdown or until every handle is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), FolderError> {
        let events = self.events_rx.clone();
        let mut heartbeat = tokio::time::interval(self.params.limits.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // deferred work settles before the next external event
            self.process_deferred().await?;

            tokio::select! {
                event = events.recv_async() => match event {
                    Ok(event) => self.handle_event(event).await?,
                    Err(_) => break,
                },
                _ = heartbeat.tick() => self.push_state().await,
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(folder = %self.folder_id, "folder group stopping");
        self.state.folder_state_purge(&self.folder_id).await;
        Ok(())
    }

    pub async fn handle_event(&mut self, event: FolderEvent) -> Result<(), FolderError> {
        match event {
            FolderEvent::Attach { handle, reply } => {
                let accepted = self.attach(handle);
                let _ = reply.send(accepted);
            }
            FolderEvent::Detach { digest } => self.detach(digest),
            FolderEvent::HandshakeSuccess { digest } => self.handle_handshake(digest),
            FolderEvent::FromPeer { digest, message } => {
                self.handle_message(digest, message).await?
            }
            FolderEvent::MetaIndexed { smeta } => self.handle_indexed_meta(&smeta).await?,
        }
        Ok(())
    }

    /// Admit a connection into the peer set
    ///
    /// One session per peer digest and per endpoint; a duplicate of either
    /// is rejected so the caller can close the redundant connection.
    pub fn attach(&mut self, handle: PeerHandle) -> bool {
        let digest = handle.digest();
        let endpoint = handle.endpoint();
        if self.sessions.contains_key(&digest) {
            tracing::debug!(folder = %self.folder_id, peer = %digest, "rejecting attach: digest already attached");
            return false;
        }
        if self.endpoints.contains(&endpoint) {
            tracing::debug!(folder = %self.folder_id, %endpoint, "rejecting attach: endpoint already attached");
            return false;
        }

        tracing::info!(folder = %self.folder_id, peer = %digest, %endpoint, name = handle.display_name(), "peer attached");
        self.endpoints.insert(endpoint);
        self.sessions.insert(digest, PeerSession::new(handle));
        self.emit(SwarmEvent::Attached { digest, endpoint });
        true
    }

    /// Remove a peer; unknown digests are a no-op
    pub fn detach(&mut self, digest: PeerDigest) {
        let Some(session) = self.sessions.remove(&digest) else {
            return;
        };
        self.endpoints.remove(&session.handle.endpoint());
        self.downloader.untrack_remote(digest);
        self.uploader.unregister(digest);
        self.meta_downloader.untrack_remote(digest);
        // requests abandoned by the departed peer go straight back out to
        // the remaining holders
        self.downloader.maintain();
        tracing::info!(folder = %self.folder_id, peer = %digest, "peer detached");
        self.emit(SwarmEvent::Detached { digest });
    }

    /// Move a peer into exchange once its handshake completed
    ///
    /// The index announcement is deferred: it runs after this event
    /// settles, so the peer observes a fully wired session first.
    pub fn handle_handshake(&mut self, digest: PeerDigest) {
        let Some(session) = self.sessions.get_mut(&digest) else {
            tracing::warn!(folder = %self.folder_id, peer = %digest, "handshake for unattached peer, ignoring");
            return;
        };
        if session.phase == PeerPhase::Ready {
            tracing::warn!(folder = %self.folder_id, peer = %digest, "duplicate handshake, ignoring");
            return;
        }
        session.phase = PeerPhase::Ready;
        let handle = session.handle.clone();
        self.downloader.track_remote(handle.clone());
        self.uploader.register(handle);
        self.deferred.push_back(Deferred::AnnounceTo(digest));
        tracing::info!(folder = %self.folder_id, peer = %digest, "peer ready");
        self.emit(SwarmEvent::Ready { digest });
    }

    /// Run a locally indexed record through the exchange engines
    ///
    /// The downloader learns which chunks are still missing, recorded
    /// remote availability is replayed, and the record is announced to
    /// every ready peer.
    pub async fn handle_indexed_meta(&mut self, smeta: &SignedMeta) -> Result<(), FolderError> {
        let bitfield = self.chunks.make_bitfield(smeta.meta()).await?;
        self.downloader.notify_local_meta(smeta.meta(), &bitfield);
        self.meta_downloader
            .replay_availability(smeta, &mut self.downloader);
        self.downloader.maintain();

        let revision = smeta.path_revision();
        tracing::debug!(folder = %self.folder_id, %revision, "record indexed");
        MetaUploader::broadcast_meta(&self.ready_handles(), &revision, &bitfield);
        Ok(())
    }

    /// Route one message from a ready peer
    pub async fn handle_message(
        &mut self,
        digest: PeerDigest,
        message: Message,
    ) -> Result<(), FolderError> {
        let Some(session) = self.sessions.get(&digest) else {
            tracing::debug!(folder = %self.folder_id, peer = %digest, "message from unattached peer, dropping");
            return Ok(());
        };
        if session.phase != PeerPhase::Ready {
            tracing::debug!(folder = %self.folder_id, peer = %digest, "message before handshake, dropping");
            return Ok(());
        }
        let handle = session.handle.clone();

        match message {
            Message::Choke => {
                self.downloader.handle_choke(digest);
                self.downloader.maintain();
            }
            Message::Unchoke => {
                self.downloader.handle_unchoke(digest);
                self.downloader.maintain();
            }
            Message::Interested => self.uploader.handle_interested(digest),
            Message::NotInterested => self.uploader.handle_not_interested(digest),
            Message::HaveMeta { revision, bitfield } => {
                self.meta_downloader
                    .handle_have_meta(
                        &handle,
                        revision,
                        bitfield,
                        self.meta.as_ref(),
                        &mut self.downloader,
                    )
                    .await?;
                self.downloader.maintain();
            }
            Message::HaveChunk { chunk } => {
                self.downloader.notify_remote_chunk(digest, chunk);
                self.downloader.maintain();
            }
            Message::MetaRequest { revision } => {
                self.meta_uploader
                    .handle_meta_request(&handle, revision, self.meta.as_ref(), self.chunks.as_ref())
                    .await?;
            }
            Message::MetaReply { meta, bitfield } => {
                let indexed = self
                    .meta_downloader
                    .handle_meta_reply(
                        &handle,
                        meta,
                        bitfield,
                        &self.folder_key,
                        self.meta.as_ref(),
                        &mut self.downloader,
                    )
                    .await?;
                match indexed {
                    Some(smeta) => self.handle_indexed_meta(&smeta).await?,
                    None => self.downloader.maintain(),
                }
            }
            Message::MetaMissing { revision } => {
                tracing::debug!(folder = %self.folder_id, peer = %digest, %revision, "peer does not hold requested record");
            }
            Message::BlockRequest {
                chunk,
                offset,
                size,
            } => {
                let served = self
                    .uploader
                    .handle_block_request(digest, chunk, offset, size, self.chunks.as_ref())
                    .await?;
                if served > 0 {
                    self.traffic.add_up(served);
                }
            }
            Message::BlockReply {
                chunk,
                offset,
                data,
            } => {
                self.traffic.add_down(data.len() as u64);
                if let Some((id, bytes)) = self.downloader.put_block(digest, chunk, offset, &data) {
                    self.commit_chunk(id, bytes).await?;
                } else {
                    self.downloader.maintain();
                }
            }
            Message::BlockReject {
                chunk,
                offset,
                size,
            } => {
                self.downloader.handle_reject(digest, chunk, offset, size);
                self.downloader.maintain();
            }
        }
        Ok(())
    }

    /// Queued work runs between events; call after each handled event in
    /// tests that bypass [`run`]
    pub async fn process_deferred(&mut self) -> Result<(), FolderError> {
        while let Some(task) = self.deferred.pop_front() {
            match task {
                Deferred::ReplayIndex => {
                    let records = self.meta.get_meta().await?;
                    tracing::debug!(folder = %self.folder_id, records = records.len(), "replaying index");
                    for smeta in records {
                        self.handle_indexed_meta(&smeta).await?;
                    }
                }
                Deferred::AnnounceTo(digest) => {
                    let Some(session) = self.sessions.get(&digest) else {
                        continue;
                    };
                    if session.phase != PeerPhase::Ready {
                        continue;
                    }
                    let handle = session.handle.clone();
                    self.meta_uploader
                        .handle_handshake(&handle, self.meta.as_ref(), self.chunks.as_ref())
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Publish the heartbeat state report
    pub async fn push_state(&mut self) {
        let mut digests: Vec<PeerDigest> = self.sessions.keys().copied().collect();
        digests.sort();

        let peers: Vec<serde_json::Value> = digests
            .iter()
            .map(|digest| {
                let session = &self.sessions[digest];
                let mut entry = serde_json::json!({
                    "name": session.handle.display_name(),
                    "endpoint": session.handle.endpoint().to_string(),
                    "digest": digest.to_hex(),
                    "phase": session.phase.to_string(),
                });
                if let Some(down) = self.downloader.peer_state(digest) {
                    entry["peer_choking"] = down.peer_choking.into();
                    entry["am_interested"] = down.am_interested.into();
                    entry["outstanding_requests"] = down.outstanding.into();
                }
                if let Some(up) = self.uploader.peer_state(digest) {
                    entry["am_choking"] = up.am_choking.into();
                    entry["peer_interested"] = up.peer_interested.into();
                }
                entry
            })
            .collect();

        self.state
            .folder_state_set(&self.folder_id, "peers", serde_json::Value::Array(peers))
            .await;
        let traffic = self.traffic.heartbeat_json();
        self.state
            .folder_state_set(&self.folder_id, "traffic_stats", traffic)
            .await;
    }

    /// Store a reassembled chunk and fan out the consequences
    ///
    /// A verification failure returns the chunk to the want pool and the
    /// folder carries on; a backend fault tears the folder down.
    async fn commit_chunk(&mut self, id: ChunkId, bytes: bytes::Bytes) -> Result<(), FolderError> {
        let size = bytes.len() as u32;
        match self.chunks.put_chunk(&id, bytes).await {
            Ok(()) => {
                self.downloader.notify_local_chunk(id);
                self.downloader.maintain();
                tracing::debug!(folder = %self.folder_id, chunk = %id, size, "chunk stored");
                Uploader::broadcast_chunk(&self.ready_handles(), id);
                Ok(())
            }
            Err(StoreError::Integrity(_)) => {
                tracing::warn!(folder = %self.folder_id, chunk = %id, "stored chunk failed verification, re-fetching");
                self.downloader.restore_missing(id, size);
                self.downloader.maintain();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn ready_handles(&self) -> Vec<PeerHandle> {
        let mut ready: Vec<&PeerSession> = self
            .sessions
            .values()
            .filter(|session| session.phase == PeerPhase::Ready)
            .collect();
        ready.sort_by_key(|session| session.handle.digest());
        ready.iter().map(|session| session.handle.clone()).collect()
    }

    fn emit(&mut self, event: SwarmEvent) {
        self.observers
            .retain(|observer| observer.send(event.clone()).is_ok());
    }
}
