use crate::directory::ContainerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub container_id: ContainerId,
    pub diagnosing: bool,
    pub active_entries: u64,
    pub reclaimed_entries: u64,
    pub reclaimed_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub duration: std::time::Duration,
}

impl CompactionReport {
    pub fn new(container_id: ContainerId, diagnosing: bool) -> Self {
        Self {
            container_id,
            diagnosing,
            active_entries: 0,
            reclaimed_entries: 0,
            reclaimed_bytes: 0,
            duration: std::time::Duration::ZERO,
        }
    }
}

// Sorts by container id only; nothing else depends on report ordering.
impl PartialOrd for CompactionReport {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CompactionReport {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.container_id.cmp(&other.container_id)
    }
}
