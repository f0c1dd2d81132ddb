use crate::controller::ControllerStatus;
use crate::directory::ContainerId;
use crate::report::CompactionReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionStats {
    pub status: ControllerStatus,
    pub total_targets: usize,
    pub reserved_count: usize,
    pub pending_count: usize,
    pub ongoing_count: usize,
    pub reserved: Vec<ContainerId>,
    pub pending: Vec<ContainerId>,
    pub ongoing: Vec<ContainerId>,
    pub locked: Vec<ContainerId>,
    pub start_time: Option<DateTime<Utc>>,
    pub reports: Vec<CompactionReport>,
}

impl CompactionStats {
    pub fn idle() -> Self {
        Self {
            status: ControllerStatus::Idling,
            total_targets: 0,
            reserved_count: 0,
            pending_count: 0,
            ongoing_count: 0,
            reserved: Vec::new(),
            pending: Vec::new(),
            ongoing: Vec::new(),
            locked: Vec::new(),
            start_time: None,
            reports: Vec::new(),
        }
    }
}
