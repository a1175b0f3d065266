use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use common::prelude::FolderId;

/// Sink for per-folder state reporting
///
/// The folder group pushes `"secret"` once at construction, `"peers"` and
/// `"traffic_stats"` on every heartbeat, and purges the folder on
/// shutdown. Reporting is telemetry: a sink failure is the sink's problem,
/// not the folder's.
#[async_trait]
pub trait StateSink: Debug + Send + Sync {
    async fn folder_state_set(&self, folder: &FolderId, key: &str, value: serde_json::Value);

    async fn folder_state_purge(&self, folder: &FolderId);
}

/// In-memory state sink, the default and the test fixture
#[derive(Debug, Clone, Default)]
pub struct MemoryStateSink {
    inner: Arc<RwLock<HashMap<FolderId, HashMap<String, serde_json::Value>>>>,
}

impl MemoryStateSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, folder: &FolderId, key: &str) -> Option<serde_json::Value> {
        self.inner
            .read()
            .get(folder)
            .and_then(|state| state.get(key))
            .cloned()
    }
}

#[async_trait]
impl StateSink for MemoryStateSink {
    async fn folder_state_set(&self, folder: &FolderId, key: &str, value: serde_json::Value) {
        self.inner
            .write()
            .entry(*folder)
            .or_default()
            .insert(key.to_string(), value);
    }

    async fn folder_state_purge(&self, folder: &FolderId) {
        self.inner.write().remove(folder);
    }
}
