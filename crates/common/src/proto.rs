use serde::{Deserialize, Serialize};

use crate::bitfield::Bitfield;
use crate::chunk::ChunkId;
use crate::meta::{PathRevision, SignedMeta};

/// Errors that can occur while encoding or decoding messages
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("message codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// One protocol message between two replicas of a folder
///
/// The same set is used in both directions; every inbound event a peer
/// session emits has a matching outbound send here. `MetaMissing` and
/// `BlockReject` are the explicit non-fatal refusal signals for a meta
/// request that cannot be served and a block request that fails
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Flow control: the sender will not serve our block requests now
    Choke,
    /// Flow control: the sender will serve our block requests
    Unchoke,
    /// The sender wants data from us
    Interested,
    /// The sender no longer wants data from us
    NotInterested,
    /// The sender holds this revision, with this chunk availability
    HaveMeta {
        revision: PathRevision,
        bitfield: Bitfield,
    },
    /// The sender holds this chunk
    HaveChunk { chunk: ChunkId },
    /// Ask for the record at exactly this revision
    MetaRequest { revision: PathRevision },
    /// A requested record, with the sender's availability for it
    MetaReply {
        meta: SignedMeta,
        bitfield: Bitfield,
    },
    /// The requested revision is not stored by the sender
    MetaMissing { revision: PathRevision },
    /// Ask for a sub-range of a chunk
    BlockRequest {
        chunk: ChunkId,
        offset: u32,
        size: u32,
    },
    /// A sub-range of a chunk
    BlockReply {
        chunk: ChunkId,
        offset: u32,
        data: Vec<u8>,
    },
    /// The block request failed validation and was refused
    BlockReject {
        chunk: ChunkId,
        offset: u32,
        size: u32,
    },
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
