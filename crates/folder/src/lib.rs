/**
 * Folder parameters and transfer policy limits.
 */
pub mod config;
/**
 * Folder-level error taxonomy. Per-message failures never
 *  surface here; only faults that tear down the folder group.
 */
pub mod error;
/**
 * The folder group orchestrator: owns storage and the four
 *  exchange engines for one shared folder, manages the peer
 *  set, routes events, and drives the state heartbeat.
 */
pub mod group;
/**
 * Peer identity and the outbound half of a peer session.
 */
pub mod peer;
/**
 * State-reporting sink consumed by the heartbeat.
 */
pub mod state;
/**
 * Traffic accounting reported under "traffic_stats".
 */
pub mod stats;
/**
 * Storage contracts for the metadata index and the
 *  content-addressed chunk store, plus in-memory
 *  implementations.
 */
pub mod store;
/**
 * The four exchange engines: chunk download/upload and
 *  metadata download/upload.
 */
pub mod transfer;

pub mod prelude {
    pub use crate::config::{FolderParams, TransferLimits};
    pub use crate::error::FolderError;
    pub use crate::group::{FolderEvent, FolderGroup, FolderHandle, SwarmEvent};
    pub use crate::peer::{PeerDigest, PeerHandle};
    pub use crate::state::{MemoryStateSink, StateSink};
    pub use crate::store::{ChunkStore, MemoryChunkStore, MemoryMetaStore, MetaStore};
}
