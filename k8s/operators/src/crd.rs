//! CRD schemas (§6): a Node resource mirroring the Registry's view of a
//! node, and a Volume resource mirroring a Volume's spec/state pair. Field
//! order of every list below is made deterministic by the reconcilers that
//! write these resources, not by anything here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "storage.openebs.io",
    version = "v1",
    kind = "StorageNode",
    plural = "storagenodes",
    shortname = "node",
    status = "StorageNodeStatus",
    namespaced
)]
pub struct StorageNodeSpec {
    pub grpc_endpoint: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, Eq, PartialEq)]
pub enum StorageNodeState {
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct StorageNodeStatus {
    pub state: StorageNodeState,
}

/// Matches `stor_port::types::v0::transport::NexusProtocol`'s wire spelling
/// (spec §6 storage protocol enumerations).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, Eq, PartialEq)]
pub enum CrdNexusProtocol {
    Nbd,
    Iscsi,
    #[default]
    Nvmf,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "storage.openebs.io",
    version = "v1",
    kind = "StorageVolume",
    plural = "storagevolumes",
    shortname = "vol",
    status = "StorageVolumeStatus",
    namespaced
)]
pub struct StorageVolumeSpec {
    pub replica_count: u8,
    pub local: bool,
    #[serde(default)]
    pub preferred_nodes: Vec<String>,
    #[serde(default)]
    pub required_nodes: Vec<String>,
    pub required_bytes: u64,
    #[serde(default)]
    pub limit_bytes: u64,
    pub protocol: CrdNexusProtocol,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, Eq, PartialEq)]
pub enum StorageVolumeState {
    #[default]
    Pending,
    Healthy,
    Degraded,
    Faulted,
    Destroyed,
    Error,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct StorageVolumeStatus {
    pub size: u64,
    pub state: StorageVolumeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
    /// Sorted ascending (node name, then replica uuid) for a deterministic
    /// diff (spec §6).
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexus: Option<String>,
}
