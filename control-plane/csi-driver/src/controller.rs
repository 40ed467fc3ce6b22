//! CSI Controller service (§4.4): name/UUID mapping, capability and
//! topology validation, idempotence deduplication and the process-wide
//! ordering of `CreateVolume`/`ControllerPublishVolume`, fronting the core
//! agent's [`CoreGrpc`](grpc::operations::core_grpc_server::CoreGrpc)
//! service over [`CoreClient`].

use crate::{csi, dedup, identity::Readiness, topology, workqueue::WorkQueue};
use grpc::{convert, core_client::CoreClient, operations as pb};
use std::{collections::HashMap, time::Duration};
use stor_port::types::v0::transport::NexusProtocol;
use tonic::{Request, Response, Status};
use uuid::Uuid;

const PVC_PREFIX: &str = "pvc-";

fn parse_volume_name(name: &str) -> Result<Uuid, Status> {
    let uuid = name
        .strip_prefix(PVC_PREFIX)
        .ok_or_else(|| Status::invalid_argument(format!("volume name '{name}' is not of the form '{PVC_PREFIX}<uuid>'")))?;
    Uuid::parse_str(uuid).map_err(|source| {
        Status::invalid_argument(format!("volume name '{name}' does not carry a valid uuid: {source}"))
    })
}

fn parse_protocol(parameters: &HashMap<String, String>) -> Result<NexusProtocol, Status> {
    let raw = parameters
        .get("protocol")
        .ok_or_else(|| Status::invalid_argument("storage class parameter 'protocol' is required"))?;
    match raw.to_ascii_lowercase().as_str() {
        "nbd" => Ok(NexusProtocol::Nbd),
        "iscsi" => Ok(NexusProtocol::Iscsi),
        "nvmf" => Ok(NexusProtocol::Nvmf),
        other => Err(Status::invalid_argument(format!("unsupported protocol '{other}'"))),
    }
}

fn parse_replica_count(parameters: &HashMap<String, String>) -> Result<u8, Status> {
    match parameters.get("repl") {
        None => Ok(1),
        Some(raw) => raw
            .parse()
            .map_err(|source| Status::invalid_argument(format!("invalid 'repl' parameter '{raw}': {source}"))),
    }
}

const TRUTHY: [&str; 4] = ["y", "yes", "true", "on"];

fn parse_local(parameters: &HashMap<String, String>) -> bool {
    parameters
        .get("local")
        .map(|raw| TRUTHY.contains(&raw.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn parse_io_timeout(parameters: &HashMap<String, String>, protocol: NexusProtocol) -> Result<(), Status> {
    if parameters.contains_key("ioTimeout") && protocol != NexusProtocol::Nvmf {
        return Err(Status::invalid_argument("'ioTimeout' is only valid with protocol 'nvmf'"));
    }
    Ok(())
}

/// Only `SINGLE_NODE_WRITER` is accepted (§4.4 Capability check).
fn check_capabilities(capabilities: &[csi::VolumeCapability]) -> Result<(), Status> {
    use csi::volume_capability::access_mode::Mode;
    if capabilities.is_empty() {
        return Err(Status::invalid_argument("at least one volume capability is required"));
    }
    for capability in capabilities {
        let mode = capability
            .access_mode
            .as_ref()
            .and_then(|access| Mode::try_from(access.mode).ok());
        if mode != Some(Mode::SingleNodeWriter) {
            return Err(Status::invalid_argument(
                "only the SINGLE_NODE_WRITER access mode is supported",
            ));
        }
    }
    Ok(())
}

fn volume_msg_to_csi(msg: &pb::VolumeMsg) -> csi::Volume {
    csi::Volume {
        capacity_bytes: msg.size as i64,
        volume_id: format!("{PVC_PREFIX}{}", msg.uuid),
        volume_context: HashMap::new(),
        accessible_topology: msg.target_node.as_ref().map(|node| csi::TopologyRequirement {
            requisite: vec![csi::Topology {
                segments: HashMap::from([(topology::TOPOLOGY_KEY_HOSTNAME.to_string(), node.clone())]),
            }],
            preferred: vec![],
        }),
    }
}

pub struct CsiControllerSvc {
    core: CoreClient,
    readiness: Readiness,
    create_dedup: dedup::DedupCache<pb::VolumeMsg>,
    publish_dedup: dedup::DedupCache<pb::VolumeMsg>,
    queue: WorkQueue,
}

impl CsiControllerSvc {
    pub fn new(core: CoreClient, readiness: Readiness, dedup_ttl: Duration) -> Self {
        Self {
            core,
            readiness,
            create_dedup: dedup::DedupCache::new(dedup_ttl),
            publish_dedup: dedup::DedupCache::new(dedup_ttl),
            queue: WorkQueue::new(),
        }
    }

    /// Controller RPCs are rejected with `UNAVAILABLE` until the supervisor
    /// calls `makeReady` (§4.4 Readiness).
    fn require_ready(&self) -> Result<(), Status> {
        if self.readiness.is_ready() {
            Ok(())
        } else {
            Err(Status::unavailable("CSI controller is not ready"))
        }
    }
}

#[tonic::async_trait]
impl csi::controller_server::Controller for CsiControllerSvc {
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        self.require_ready()?;
        let req = request.into_inner();
        check_capabilities(&req.volume_capabilities)?;
        let uuid = parse_volume_name(&req.name)?;

        let protocol = parse_protocol(&req.parameters)?;
        let replica_count = parse_replica_count(&req.parameters)?;
        let local = parse_local(&req.parameters);
        parse_io_timeout(&req.parameters, protocol)?;
        let topology = topology::node_topology(&req.accessibility_requirements)
            .map_err(|error| Status::invalid_argument(error.to_string()))?;

        let range = req.capacity_range.unwrap_or_default();
        let required_bytes = range.required_bytes.max(0) as u64;
        let limit_bytes = range.limit_bytes.max(0) as u64;

        let lease = self.create_dedup.acquire(req.name.clone());
        let outcome = match lease {
            dedup::Lease::Cached(result) => result,
            dedup::Lease::Follower(rx) => dedup::await_outcome(rx).await,
            dedup::Lease::Leader(guard) => {
                let mut core = self.core.inner();
                let wire = pb::CreateVolumeRequest {
                    uuid: uuid.to_string(),
                    replica_count: replica_count as u32,
                    local,
                    preferred_nodes: topology.preferred,
                    required_nodes: topology.required,
                    required_bytes,
                    limit_bytes,
                    protocol: convert::nexus_protocol_to_msg(protocol),
                };
                let result = self
                    .queue
                    .submit(async move { core.create_volume(wire).await.map(Response::into_inner) })
                    .await;
                guard.complete(&result);
                result
            }
        };
        outcome.map(|msg| Response::new(csi::CreateVolumeResponse { volume: Some(volume_msg_to_csi(&msg)) }))
    }

    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        self.require_ready()?;
        let uuid = parse_volume_name(&request.into_inner().volume_id)?;
        self.core
            .inner()
            .destroy_volume(pb::DestroyVolumeRequest { uuid: uuid.to_string() })
            .await?;
        Ok(Response::new(csi::DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        self.require_ready()?;
        let req = request.into_inner();
        if let Some(capability) = &req.volume_capability {
            check_capabilities(std::slice::from_ref(capability))?;
        }
        let uuid = parse_volume_name(&req.volume_id)?;

        let key = format!("{}:{}", uuid, req.node_id);
        let lease = self.publish_dedup.acquire(key);
        let outcome = match lease {
            dedup::Lease::Cached(result) => result,
            dedup::Lease::Follower(rx) => dedup::await_outcome(rx).await,
            dedup::Lease::Leader(guard) => {
                let mut core = self.core.inner();
                let wire = pb::PublishVolumeRequest { uuid: uuid.to_string(), node: req.node_id.clone() };
                let result = self
                    .queue
                    .submit(async move { core.publish_volume(wire).await.map(Response::into_inner) })
                    .await;
                guard.complete(&result);
                result
            }
        };
        outcome.map(|_msg| Response::new(csi::ControllerPublishVolumeResponse { publish_context: HashMap::new() }))
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        self.require_ready()?;
        let uuid = parse_volume_name(&request.into_inner().volume_id)?;
        self.core
            .inner()
            .unpublish_volume(pb::UnpublishVolumeRequest { uuid: uuid.to_string() })
            .await?;
        Ok(Response::new(csi::ControllerUnpublishVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        self.require_ready()?;
        let req = request.into_inner();
        let uuid = parse_volume_name(&req.volume_id)?;
        self.core
            .inner()
            .get_volume(pb::GetVolumeRequest { uuid: uuid.to_string() })
            .await?;

        match check_capabilities(&req.volume_capabilities) {
            Ok(()) => Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
                confirmed: Some(csi::validate_volume_capabilities_response::Confirmed {
                    volume_context: req.volume_context,
                    volume_capabilities: req.volume_capabilities,
                }),
                message: String::new(),
            })),
            Err(status) => Ok(Response::new(csi::ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: status.message().to_string(),
            })),
        }
    }

    async fn list_volumes(
        &self,
        request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        self.require_ready()?;
        let req = request.into_inner();
        let wire = pb::ListVolumesRequest {
            max_entries: req.max_entries.max(0) as u32,
            starting_token: req.starting_token,
        };
        let response = self.core.inner().list_volumes(wire).await?.into_inner();
        Ok(Response::new(csi::ListVolumesResponse {
            entries: response
                .volumes
                .iter()
                .map(|msg| csi::list_volumes_response::Entry { volume: Some(volume_msg_to_csi(msg)) })
                .collect(),
            next_token: response.next_token,
        }))
    }

    async fn get_capacity(
        &self,
        request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        self.require_ready()?;
        let req = request.into_inner();
        let topology = topology::node_topology(&req.accessible_topology)
            .map_err(|error| Status::invalid_argument(error.to_string()))?;
        let node = topology.required.into_iter().next();
        let wire = pb::GetCapacityRequest { node };
        let response = self.core.inner().get_capacity(wire).await?.into_inner();
        Ok(Response::new(csi::GetCapacityResponse {
            available_capacity: response.available_bytes as i64,
        }))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::{rpc::Type as Rpc, Type, Rpc as RpcMsg};
        let rpc = |ty: Rpc| csi::ControllerServiceCapability {
            r#type: Some(Type::Rpc(RpcMsg { r#type: ty as i32 })),
        };
        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities: vec![
                rpc(Rpc::CreateDeleteVolume),
                rpc(Rpc::PublishUnpublishVolume),
                rpc(Rpc::ListVolumes),
                rpc(Rpc::GetCapacity),
            ],
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not implemented"))
    }

    async fn delete_snapshot(
        &self,
        _request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        Err(Status::unimplemented("snapshots are not implemented"))
    }

    async fn list_snapshots(
        &self,
        _request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("snapshots are not implemented"))
    }

    async fn controller_expand_volume(
        &self,
        _request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("volume expansion is not implemented"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pvc_name_round_trips_uuid() {
        let uuid = Uuid::new_v4();
        let name = format!("pvc-{uuid}");
        assert_eq!(parse_volume_name(&name).unwrap(), uuid);
    }

    #[test]
    fn name_without_prefix_is_rejected() {
        assert!(parse_volume_name(&Uuid::new_v4().to_string()).is_err());
    }

    #[test]
    fn protocol_is_required() {
        assert!(parse_protocol(&HashMap::new()).is_err());
    }

    #[test]
    fn io_timeout_requires_nvmf() {
        let params = HashMap::from([("ioTimeout".to_string(), "5s".to_string())]);
        assert!(parse_io_timeout(&params, NexusProtocol::Nbd).is_err());
        assert!(parse_io_timeout(&params, NexusProtocol::Nvmf).is_ok());
    }

    #[test]
    fn local_parameter_accepts_common_truthy_spellings() {
        for value in ["y", "Y", "yes", "Yes", "YES", "true", "True", "TRUE", "on", "On", "ON"] {
            let params = HashMap::from([("local".to_string(), value.to_string())]);
            assert!(parse_local(&params), "'{value}' should parse as local");
        }
        assert!(!parse_local(&HashMap::new()));
    }

    #[test]
    fn local_parameter_rejects_bare_digit() {
        let params = HashMap::from([("local".to_string(), "1".to_string())]);
        assert!(!parse_local(&params));
    }

    #[test]
    fn multi_node_writer_capability_is_rejected() {
        let cap = csi::VolumeCapability {
            access_type: None,
            access_mode: Some(csi::volume_capability::AccessMode {
                mode: csi::volume_capability::access_mode::Mode::MultiNodeMultiWriter as i32,
            }),
        };
        assert!(check_capabilities(&[cap]).is_err());
    }
}
