use super::ids::{NexusId, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum NexusStatus {
    Online,
    Degraded,
    Offline,
    Faulted,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChildStatus {
    Online,
    Degraded,
    Faulted,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NexusChild {
    pub uri: String,
    pub status: ChildStatus,
}

/// The data-plane abstraction that fronts a volume (spec §3 Nexus, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusState {
    pub uuid: NexusId,
    pub node: NodeId,
    pub size: u64,
    pub status: NexusStatus,
    /// Kept sorted by URI for deterministic comparison (spec §3).
    pub children: Vec<NexusChild>,
    pub device_uri: Option<String>,
}

impl NexusState {
    /// Merge in freshly observed properties, returning whether anything
    /// actually changed (spec §3: "`merge()` which emits `mod` only if
    /// something actually changed").
    pub fn merge(&mut self, mut fresh: NexusState) -> bool {
        fresh.children.sort_by(|a, b| a.uri.cmp(&b.uri));
        let changed = self.size != fresh.size
            || self.status != fresh.status
            || self.children != fresh.children
            || self.device_uri != fresh.device_uri;
        if changed {
            self.size = fresh.size;
            self.status = fresh.status;
            self.children = fresh.children;
            self.device_uri = fresh.device_uri;
        }
        changed
    }

    pub fn offline(&mut self) -> bool {
        if self.status == NexusStatus::Offline {
            return false;
        }
        self.status = NexusStatus::Offline;
        for child in &mut self.children {
            child.status = ChildStatus::Faulted;
        }
        true
    }
}
