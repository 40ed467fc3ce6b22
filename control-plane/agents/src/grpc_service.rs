//! The [`CoreGrpc`](grpc::operations::core_grpc_server::CoreGrpc) server
//! implementation: bridges the wire messages the CSI controller and CRD
//! reconcilers send into [`Registry`]/[`VolumeManager`] calls.

use crate::{registry::Registry, volume::VolumeManager};
use grpc::{convert, operations as pb};
use std::str::FromStr;
use stor_port::transport_api::{InvalidArguments, SvcError, VolumeNotFound};
use stor_port::types::v0::transport::{NodeId, VolumeId, VolumeSpec};
use tonic::{Request, Response, Status};

pub struct CoreGrpcService {
    registry: Registry,
    volumes: VolumeManager,
}

impl CoreGrpcService {
    pub fn new(registry: Registry, volumes: VolumeManager) -> Self {
        Self { registry, volumes }
    }
}

fn parse_volume_id(uuid: &str) -> Result<VolumeId, SvcError> {
    VolumeId::from_str(uuid).map_err(|source| {
        InvalidArguments {
            details: format!("invalid volume uuid '{uuid}': {source}"),
        }
        .build()
    })
}

#[tonic::async_trait]
impl pb::core_grpc_server::CoreGrpc for CoreGrpcService {
    async fn create_volume(
        &self,
        request: Request<pb::CreateVolumeRequest>,
    ) -> Result<Response<pb::VolumeMsg>, Status> {
        let req = request.into_inner();
        let uuid = parse_volume_id(&req.uuid)?;
        let protocol = convert::msg_to_nexus_protocol(req.protocol)?;
        let spec = VolumeSpec {
            uuid,
            replica_count: req.replica_count.try_into().map_err(|_| {
                InvalidArguments {
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
        let size = req.required_bytes;
        let state = self.volumes.create_volume(spec, size).await?;
        Ok(Response::new(convert::volume_state_to_msg(&state)))
    }

    async fn update_volume(
        &self,
        request: Request<pb::UpdateVolumeRequest>,
    ) -> Result<Response<pb::VolumeMsg>, Status> {
        let req = request.into_inner();
        let uuid = parse_volume_id(&req.uuid)?;
        let preferred_nodes = if req.preferred_nodes.is_empty() {
            None
        } else {
            Some(req.preferred_nodes.into_iter().map(NodeId::from).collect())
        };
        let required_nodes = if req.required_nodes.is_empty() {
            None
        } else {
            Some(req.required_nodes.into_iter().map(NodeId::from).collect())
        };
        let replica_count = req
            .replica_count
            .map(|count| {
                count.try_into().map_err(|_| {
                    InvalidArguments {
                        details: format!("replica_count {count} out of range"),
                    }
                    .build()
                })
            })
            .transpose()?;
        self.volumes.update_spec(&uuid, preferred_nodes, required_nodes, replica_count)?;
        let state = self
            .volumes
            .get(&uuid)
            .ok_or_else(|| VolumeNotFound { uuid: uuid.to_string() }.build())?;
        Ok(Response::new(convert::volume_state_to_msg(&state)))
    }

    async fn destroy_volume(
        &self,
        request: Request<pb::DestroyVolumeRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let uuid = parse_volume_id(&request.into_inner().uuid)?;
        self.volumes.destroy(&uuid).await?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn publish_volume(
        &self,
        request: Request<pb::PublishVolumeRequest>,
    ) -> Result<Response<pb::VolumeMsg>, Status> {
        let req = request.into_inner();
        let uuid = parse_volume_id(&req.uuid)?;
        self.volumes.publish(&uuid, &NodeId::from(req.node)).await?;
        let state = self
            .volumes
            .get(&uuid)
            .ok_or_else(|| VolumeNotFound { uuid: uuid.to_string() }.build())?;
        Ok(Response::new(convert::volume_state_to_msg(&state)))
    }

    async fn unpublish_volume(
        &self,
        request: Request<pb::UnpublishVolumeRequest>,
    ) -> Result<Response<pb::VolumeMsg>, Status> {
        let uuid = parse_volume_id(&request.into_inner().uuid)?;
        self.volumes.unpublish(&uuid).await?;
        let state = self
            .volumes
            .get(&uuid)
            .ok_or_else(|| VolumeNotFound { uuid: uuid.to_string() }.build())?;
        Ok(Response::new(convert::volume_state_to_msg(&state)))
    }

    async fn get_volume(
        &self,
        request: Request<pb::GetVolumeRequest>,
    ) -> Result<Response<pb::VolumeMsg>, Status> {
        let uuid = parse_volume_id(&request.into_inner().uuid)?;
        let state = self
            .volumes
            .get(&uuid)
            .ok_or_else(|| VolumeNotFound { uuid: uuid.to_string() }.build())?;
        Ok(Response::new(convert::volume_state_to_msg(&state)))
    }

    async fn list_volumes(
        &self,
        request: Request<pb::ListVolumesRequest>,
    ) -> Result<Response<pb::ListVolumesResponse>, Status> {
        let req = request.into_inner();
        let max_entries = if req.max_entries == 0 { 1000 } else { req.max_entries as usize };
        let mut all = self.volumes.list();
        all.sort_by(|a, b| a.uuid.to_string().cmp(&b.uuid.to_string()));

        let start = if req.starting_token.is_empty() {
            0
        } else {
            all.iter()
                .position(|v| v.uuid.to_string() == req.starting_token)
                .map(|i| i + 1)
                .unwrap_or(all.len())
        };

        let page: Vec<_> = all.iter().skip(start).take(max_entries).collect();
        let next_token = if start + page.len() < all.len() {
            page.last().map(|v| v.uuid.to_string()).unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Response::new(pb::ListVolumesResponse {
            volumes: page.into_iter().map(convert::volume_state_to_msg).collect(),
            next_token,
        }))
    }

    async fn get_capacity(
        &self,
        request: Request<pb::GetCapacityRequest>,
    ) -> Result<Response<pb::GetCapacityResponse>, Status> {
        let node = request.into_inner().node.map(NodeId::from);
        let available_bytes = self.registry.capacity(node.as_ref());
        Ok(Response::new(pb::GetCapacityResponse { available_bytes }))
    }

    async fn import_volume(
        &self,
        request: Request<pb::ImportVolumeRequest>,
    ) -> Result<Response<pb::VolumeMsg>, Status> {
        let (spec, state) = convert::msg_to_imported_volume(request.into_inner())?;
        self.volumes.import_volume(spec, state.clone());
        Ok(Response::new(convert::volume_state_to_msg(&state)))
    }

    async fn add_node(
        &self,
        request: Request<pb::AddNodeRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        self.registry.register_node(NodeId::from(req.id), req.grpc_endpoint);
        Ok(Response::new(pb::Empty {}))
    }

    async fn remove_node(
        &self,
        request: Request<pb::RemoveNodeRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        self.registry.remove_node(&NodeId::from(request.into_inner().id));
        Ok(Response::new(pb::Empty {}))
    }

    async fn list_nodes(
        &self,
        _request: Request<pb::ListNodesRequest>,
    ) -> Result<Response<pb::ListNodesResponse>, Status> {
        let nodes = self.registry.nodes().iter().map(convert::node_state_to_msg).collect();
        Ok(Response::new(pb::ListNodesResponse { nodes }))
    }
}
