//! Peer identity and the outbound half of a peer session
//!
//! The transport that handshakes and frames messages lives outside this
//! crate. What the folder group sees of a live session is a `PeerHandle`:
//! the peer's identity plus a queue of outbound messages the transport
//! drains. Inbound traffic arrives on the folder group's event channel.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use common::prelude::Message;

/// Size of a peer digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// Cryptographic digest identifying one remote replica
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerDigest([u8; DIGEST_SIZE]);

impl PeerDigest {
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PeerDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form for logs
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for PeerDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerDigest({})", self.to_hex())
    }
}

/// Handshake progress of an attached peer
///
/// `attached -> handshaking -> ready`; detach is terminal and simply
/// removes the session. Only ready peers take part in exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Handshaking,
    Ready,
}

impl fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerPhase::Handshaking => write!(f, "handshaking"),
            PeerPhase::Ready => write!(f, "ready"),
        }
    }
}

/// Outbound handle to one attached peer connection
///
/// Cheap to clone; sending never blocks. A send to a torn-down transport
/// is dropped, not retried: an abandoned message is re-issued (or not) by
/// the engines' own bookkeeping, never by the handle.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    digest: PeerDigest,
    endpoint: SocketAddr,
    name: String,
    outbound: flume::Sender<Message>,
}

impl PeerHandle {
    /// Create a handle and the receiver its transport drains
    pub fn new(
        digest: PeerDigest,
        endpoint: SocketAddr,
        name: impl Into<String>,
    ) -> (Self, flume::Receiver<Message>) {
        let (tx, rx) = flume::unbounded();
        (
            Self {
                digest,
                endpoint,
                name: name.into(),
                outbound: tx,
            },
            rx,
        )
    }

    pub fn digest(&self) -> PeerDigest {
        self.digest
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Queue one outbound message for the transport
    pub fn send(&self, message: Message) {
        if self.outbound.send(message).is_err() {
            tracing::debug!(peer = %self.digest, "dropping message for closed peer transport");
        }
    }
}

/// Runtime state of one attached peer, as the folder group tracks it
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub handle: PeerHandle,
    pub phase: PeerPhase,
}

impl PeerSession {
    pub fn new(handle: PeerHandle) -> Self {
        Self {
            handle,
            phase: PeerPhase::Handshaking,
        }
    }
}
