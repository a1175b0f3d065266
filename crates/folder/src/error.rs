use crate::store::StoreError;

/// Folder-fatal errors
///
/// Everything here tears down the folder group. Per-message conditions
/// (rejected attach, verification failure, out-of-range block request,
/// stale revision) are handled where they occur and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum FolderError {
    #[error("folder storage error: {0}")]
    Store(#[from] StoreError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("folder group channel closed")]
    ChannelClosed,
}
