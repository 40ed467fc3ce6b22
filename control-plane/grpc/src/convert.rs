//! Conversions between [`operations`](crate::operations) wire messages and
//! the shared transport types (§3), used by both the core agent's server
//! implementation and the CSI/CRD clients.

use crate::operations as pb;
use std::str::FromStr;
use stor_port::transport_api::{Internal, SvcError};
use stor_port::types::v0::transport::{
    NexusId, NexusProtocol, NodeId, NodeState, NodeStatus, ReplicaId, VolumeId, VolumeSpec, VolumeState,
    VolumeStatus,
};

pub fn nexus_protocol_to_msg(protocol: NexusProtocol) -> i32 {
    match protocol {
        NexusProtocol::Nbd => pb::NexusProtocolMsg::NexusProtocolNbd as i32,
        NexusProtocol::Iscsi => pb::NexusProtocolMsg::NexusProtocolIscsi as i32,
        NexusProtocol::Nvmf => pb::NexusProtocolMsg::NexusProtocolNvmf as i32,
    }
}

pub fn msg_to_nexus_protocol(value: i32) -> Result<NexusProtocol, SvcError> {
    match pb::NexusProtocolMsg::try_from(value) {
        Ok(pb::NexusProtocolMsg::NexusProtocolNbd) => Ok(NexusProtocol::Nbd),
        Ok(pb::NexusProtocolMsg::NexusProtocolIscsi) => Ok(NexusProtocol::Iscsi),
        Ok(pb::NexusProtocolMsg::NexusProtocolNvmf) => Ok(NexusProtocol::Nvmf),
        Err(_) => Err(Internal {
            details: format!("unknown nexus protocol tag {value}"),
        }
        .build()),
    }
}

fn status_to_i32(status: VolumeStatus) -> i32 {
    status as i32
}

fn i32_to_status(value: i32) -> Result<VolumeStatus, SvcError> {
    match value {
        0 => Ok(VolumeStatus::Pending),
        1 => Ok(VolumeStatus::Healthy),
        2 => Ok(VolumeStatus::Degraded),
        3 => Ok(VolumeStatus::Faulted),
        4 => Ok(VolumeStatus::Destroyed),
        5 => Ok(VolumeStatus::Error),
        other => Err(Internal {
            details: format!("unknown volume status tag {other}"),
        }
        .build()),
    }
}

pub fn volume_state_to_msg(state: &VolumeState) -> pb::VolumeMsg {
    pb::VolumeMsg {
        uuid: state.uuid.to_string(),
        status: status_to_i32(state.status),
        size: state.size,
        nexus: None,
        replicas: state
            .replicas
            .iter()
            .map(|replica| pb::ReplicaMsg {
                uuid: replica.to_string(),
                node: String::new(),
            })
            .collect(),
        target_node: state.target_node.as_ref().map(|node| node.to_string()),
        last_failure: state.last_failure.clone(),
    }
}

pub fn msg_to_volume_state(msg: pb::VolumeMsg) -> Result<VolumeState, SvcError> {
    let parse_uuid = |s: &str, what: &str| -> Result<_, SvcError> {
        VolumeId::from_str(s).map_err(|source| {
            Internal {
                details: format!("invalid {what} '{s}': {source}"),
            }
            .build()
        })
    };
    Ok(VolumeState {
        uuid: parse_uuid(&msg.uuid, "volume uuid")?,
        status: i32_to_status(msg.status)?,
        size: msg.size,
        nexus: msg
            .nexus
            .map(|nexus| {
                NexusId::from_str(&nexus.uuid).map_err(|source| {
                    Internal {
                        details: format!("invalid nexus uuid '{}': {source}", nexus.uuid),
                    }
                    .build()
                })
            })
            .transpose()?,
        replicas: msg
            .replicas
            .into_iter()
            .map(|replica| {
                ReplicaId::from_str(&replica.uuid).map_err(|source| {
                    Internal {
                        details: format!("invalid replica uuid '{}': {source}", replica.uuid),
                    }
                    .build()
                })
            })
            .collect::<Result<_, _>>()?,
        target_node: msg.target_node.map(NodeId::from),
        last_failure: msg.last_failure,
    })
}

fn node_status_to_i32(status: NodeStatus) -> i32 {
    match status {
        NodeStatus::Unknown => 0,
        NodeStatus::Online => 1,
        NodeStatus::Offline => 2,
    }
}

fn i32_to_node_status(value: i32) -> Result<NodeStatus, SvcError> {
    match value {
        0 => Ok(NodeStatus::Unknown),
        1 => Ok(NodeStatus::Online),
        2 => Ok(NodeStatus::Offline),
        other => Err(Internal {
            details: format!("unknown node status tag {other}"),
        }
        .build()),
    }
}

pub fn node_state_to_msg(state: &NodeState) -> pb::NodeMsg {
    pb::NodeMsg {
        id: state.id.to_string(),
        grpc_endpoint: state.grpc_endpoint.clone(),
        status: node_status_to_i32(state.status),
    }
}

pub fn msg_to_node_state(msg: pb::NodeMsg) -> Result<NodeState, SvcError> {
    Ok(NodeState {
        id: NodeId::from(msg.id),
        grpc_endpoint: msg.grpc_endpoint,
        status: i32_to_node_status(msg.status)?,
    })
}

/// Build the spec/state pair a CR's `new` event reconstructs without
/// re-creating replicas (spec §4.5 `importVolume`).
pub fn msg_to_imported_volume(req: pb::ImportVolumeRequest) -> Result<(VolumeSpec, VolumeState), SvcError> {
    let uuid = VolumeId::from_str(&req.uuid).map_err(|source| {
        Internal {
            details: format!("invalid volume uuid '{}': {source}", req.uuid),
        }
        .build()
    })?;
    let protocol = msg_to_nexus_protocol(req.protocol)?;
    let spec = VolumeSpec {
        uuid,
        replica_count: req.replica_count.try_into().map_err(|_| {
            Internal {
                details: format!("replica_count {} out of range", req.replica_count),
            }
            .build()
        })?,
        local: req.local,
        preferred_nodes: req.preferred_nodes.into_iter().map(NodeId::from).collect(),
        required_nodes: req.required_nodes.into_iter().map(NodeId::from).collect(),
        required_bytes: req.required_bytes,
        limit_bytes: req.limit_bytes,
        protocol,
    };
    let state = VolumeState {
        uuid,
        status: i32_to_status(req.status)?,
        size: req.size,
        nexus: req
            .nexus
            .map(|uuid| {
                NexusId::from_str(&uuid).map_err(|source| {
                    Internal { details: format!("invalid nexus uuid '{uuid}': {source}") }.build()
                })
            })
            .transpose()?,
        replicas: req
            .replicas
            .into_iter()
            .map(|uuid| {
                ReplicaId::from_str(&uuid)
                    .map_err(|source| Internal { details: format!("invalid replica uuid '{uuid}': {source}") }.build())
            })
            .collect::<Result<_, _>>()?,
        target_node: req.target_node.map(NodeId::from),
        last_failure: None,
    };
    Ok((spec, state))
}
