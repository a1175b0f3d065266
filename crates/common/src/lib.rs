/**
 * Availability bitfields: one presence bit per chunk
 *  of a metadata record, in block-list order.
 */
pub mod bitfield;
/**
 * Chunk identifiers. A chunk is content-addressed by
 *  the BLAKE3 hash of its bytes and identified by that
 *  hash everywhere: in metadata block lists, in storage,
 *  and on the wire.
 */
pub mod chunk;
/**
 * Versioned file metadata records and their authenticity
 *  proofs. A record is immutable once signed; newer
 *  revisions supersede it rather than mutate it.
 */
pub mod meta;
/**
 * The typed message set exchanged between replicas:
 *  flow control, availability announcements, and the
 *  metadata/block request-reply pairs. Byte layout on
 *  the wire belongs to the transport, not here.
 */
pub mod proto;
/**
 * Folder secret and the identities derived from it.
 */
pub mod secret;

pub mod prelude {
    pub use crate::bitfield::Bitfield;
    pub use crate::chunk::ChunkId;
    pub use crate::meta::{FileAttrs, Meta, PathRevision, SignedMeta};
    pub use crate::proto::Message;
    pub use crate::secret::{FolderId, FolderKey, FolderSecret};
}
