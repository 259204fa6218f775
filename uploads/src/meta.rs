use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// On-disk session metadata (`{uploadId}/meta.json`), mirroring the
/// original's `meta` dict one field at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMeta {
    pub user_id: String,
    pub filename: String,
    pub total_chunks: u32,
    pub total_size: u64,
    pub target_path: String,
    pub received: BTreeSet<u32>,
    pub created_at: DateTime<Utc>,
}

impl UploadMeta {
    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_chunks
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}
