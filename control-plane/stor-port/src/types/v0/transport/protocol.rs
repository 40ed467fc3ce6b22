//! Storage protocol enumerations (spec §6).

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Replica share protocol.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
pub enum ReplicaProtocol {
    None,
    Iscsi,
    Nvmf,
}

/// Nexus (target) share/frontend protocol.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
pub enum NexusProtocol {
    Nbd,
    Iscsi,
    Nvmf,
}

/// Replica share protocol string form used on the CRD wire (spec §6).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, AsRefStr)]
pub enum CrdReplicaProtocol {
    #[strum(serialize = "REPLICA_NONE")]
    ReplicaNone,
    #[strum(serialize = "REPLICA_ISCSI")]
    ReplicaIscsi,
    #[strum(serialize = "REPLICA_NVMF")]
    ReplicaNvmf,
}

impl From<ReplicaProtocol> for CrdReplicaProtocol {
    fn from(value: ReplicaProtocol) -> Self {
        match value {
            ReplicaProtocol::None => CrdReplicaProtocol::ReplicaNone,
            ReplicaProtocol::Iscsi => CrdReplicaProtocol::ReplicaIscsi,
            ReplicaProtocol::Nvmf => CrdReplicaProtocol::ReplicaNvmf,
        }
    }
}
