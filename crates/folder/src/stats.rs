/// Aggregate transfer accounting for one folder
///
/// Counts payload bytes and whole blocks in both directions. The heartbeat
/// snapshots it once per interval; the snapshot also reports the bytes
/// moved since the previous snapshot as the current rate.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    up_bytes: u64,
    down_bytes: u64,
    up_blocks: u64,
    down_blocks: u64,
    last_up_bytes: u64,
    last_down_bytes: u64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one served block payload
    pub fn add_up(&mut self, bytes: u64) {
        self.up_bytes += bytes;
        self.up_blocks += 1;
    }

    /// Account one received block payload
    pub fn add_down(&mut self, bytes: u64) {
        self.down_bytes += bytes;
        self.down_blocks += 1;
    }

    /// Heartbeat snapshot; advances the rate window
    pub fn heartbeat_json(&mut self) -> serde_json::Value {
        let up_rate = self.up_bytes - self.last_up_bytes;
        let down_rate = self.down_bytes - self.last_down_bytes;
        self.last_up_bytes = self.up_bytes;
        self.last_down_bytes = self.down_bytes;

        serde_json::json!({
            "up_bytes": self.up_bytes,
            "down_bytes": self.down_bytes,
            "up_blocks": self.up_blocks,
            "down_blocks": self.down_blocks,
            "up_bytes_rate": up_rate,
            "down_bytes_rate": down_rate,
        })
    }
}
