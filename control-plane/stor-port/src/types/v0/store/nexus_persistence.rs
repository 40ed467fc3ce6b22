//! The JSON shape persisted per nexus UUID in the persistent store (spec §4.6).

use crate::types::v0::transport::{NexusId, ReplicaId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildInfo {
    pub uuid: ReplicaId,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusInfo {
    pub clean_shutdown: bool,
    pub children: Vec<ChildInfo>,
}

/// Persistent-store key: one entry per nexus UUID.
#[derive(Debug, Clone)]
pub struct NexusInfoKey(NexusId);

impl NexusInfoKey {
    pub fn new(nexus: &NexusId) -> Self {
        Self(*nexus)
    }
    pub fn key(&self) -> String {
        format!("/nexus-info/{}", self.0)
    }
}
