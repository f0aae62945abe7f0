use serde::Serialize;

use crate::manifest::FileEntry;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Moving,
    Verifying,
    Complete,
    TimedOut,
}

/// Contiguous run of manifest entries moved as one unit.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// 0-based position in the upload order.
    pub index: usize,
    pub entries: Vec<FileEntry>,
}

impl Batch {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Greedy grouping in manifest order.
///
/// An entry that would push a non-empty batch past `ceiling` closes that batch
/// and opens the next one; an entry larger than `ceiling` on its own therefore
/// ends up alone in its batch.
pub fn make_batches(entries: Vec<FileEntry>, ceiling: u64) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<FileEntry> = Vec::new();
    let mut running = 0u64;
    for e in entries {
        if !current.is_empty() && running.saturating_add(e.size_bytes) > ceiling {
            batches.push(Batch { index: batches.len(), entries: std::mem::take(&mut current) });
            running = 0;
        }
        running = running.saturating_add(e.size_bytes);
        current.push(e);
    }
    if !current.is_empty() {
        batches.push(Batch { index: batches.len(), entries: current });
    }
    batches
}
