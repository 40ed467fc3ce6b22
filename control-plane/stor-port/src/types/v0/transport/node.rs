use super::ids::NodeId;
use serde::{Deserialize, Serialize};

/// The controller's cached view of a single storage node (spec §3 Node).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    pub grpc_endpoint: Option<String>,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Offline,
    /// Registered but never successfully synced yet.
    Unknown,
}
