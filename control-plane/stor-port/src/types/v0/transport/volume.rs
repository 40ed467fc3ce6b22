use super::{
    ids::{NexusId, NodeId, ReplicaId, VolumeId},
    protocol::NexusProtocol,
};
use serde::{Deserialize, Serialize};

/// The desired state of a Volume (spec §3 Volume/Spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub uuid: VolumeId,
    pub replica_count: u8,
    pub local: bool,
    pub preferred_nodes: Vec<NodeId>,
    pub required_nodes: Vec<NodeId>,
    pub required_bytes: u64,
    pub limit_bytes: u64,
    pub protocol: NexusProtocol,
}

impl VolumeSpec {
    /// `size ≥ requiredBytes` and, if `limitBytes > 0`, `size ≤ limitBytes` (spec §3).
    pub fn size_is_valid(&self, size: u64) -> bool {
        size >= self.required_bytes && (self.limit_bytes == 0 || size <= self.limit_bytes)
    }
}

/// The FSM states of spec §4.3.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum VolumeStatus {
    Pending,
    Healthy,
    Degraded,
    Faulted,
    Destroyed,
    Error,
}

/// The observed state of a Volume (spec §3 Volume/Status).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeState {
    pub uuid: VolumeId,
    pub status: VolumeStatus,
    pub size: u64,
    pub nexus: Option<NexusId>,
    pub replicas: Vec<ReplicaId>,
    pub target_node: Option<NodeId>,
    pub last_failure: Option<String>,
}

impl VolumeState {
    pub fn pending(uuid: VolumeId, size: u64) -> Self {
        Self {
            uuid,
            status: VolumeStatus::Pending,
            size,
            nexus: None,
            replicas: Vec::new(),
            target_node: None,
            last_failure: None,
        }
    }
}
