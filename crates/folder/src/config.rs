use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::prelude::FolderSecret;

/// Parameters of one configured folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderParams {
    /// Replicated directory root
    pub path: PathBuf,
    /// Folder-private directory for index and chunk storage
    pub system_path: PathBuf,
    /// The folder's root secret
    pub secret: FolderSecret,
    #[serde(default)]
    pub limits: TransferLimits,
}

/// Transfer policy knobs
///
/// The choke/unchoke and block-selection policies are parameterized rather
/// than hard-coded; these are the defaults the engines are tested with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLimits {
    /// Outstanding block requests allowed per peer
    pub max_requests_per_peer: usize,
    /// Interested peers served concurrently before choking the rest
    pub upload_slots: usize,
    /// Sub-chunk transfer unit in bytes
    pub fragment_size: u32,
    /// State-report interval
    pub heartbeat: Duration,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            max_requests_per_peer: 8,
            upload_slots: 4,
            fragment_size: 32 * 1024,
            heartbeat: Duration::from_secs(1),
        }
    }
}

impl TransferLimits {
    /// Replace unusable knob values with the defaults
    ///
    /// A zero fragment size or request bound cannot schedule any transfer,
    /// and a zero heartbeat cannot drive an interval. Zero upload slots is
    /// a valid policy (never unchoke) and stays as configured.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.fragment_size == 0 {
            tracing::warn!(
                fallback = defaults.fragment_size,
                "fragment_size of 0 is unusable, using the default"
            );
            self.fragment_size = defaults.fragment_size;
        }
        if self.max_requests_per_peer == 0 {
            tracing::warn!(
                fallback = defaults.max_requests_per_peer,
                "max_requests_per_peer of 0 is unusable, using the default"
            );
            self.max_requests_per_peer = defaults.max_requests_per_peer;
        }
        if self.heartbeat.is_zero() {
            tracing::warn!("heartbeat of 0 is unusable, using the default");
            self.heartbeat = defaults.heartbeat;
        }
        self
    }
}
