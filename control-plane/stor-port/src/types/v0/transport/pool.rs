use super::ids::{NodeId, PoolId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum PoolStatus {
    Online,
    Degraded,
    Offline,
}

impl PoolStatus {
    /// A pool is *accessible* iff its state is ONLINE or DEGRADED (spec §3).
    pub fn accessible(&self) -> bool {
        matches!(self, PoolStatus::Online | PoolStatus::Degraded)
    }
}

/// A storage-node-local aggregate of disks (spec §3 Pool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    pub id: PoolId,
    pub node: NodeId,
    pub disks: Vec<String>,
    pub status: PoolStatus,
    pub capacity: u64,
    pub used: u64,
}

impl PoolState {
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}
