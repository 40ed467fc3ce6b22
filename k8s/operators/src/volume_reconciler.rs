//! Volume CR reconciler (§4.5). Unlike nodes, the direction table only
//! drives Registry state off the CR: `new` imports, `mod` updates spec,
//! `del` destroys. There is no Registry-to-CR push for volumes.

use crate::{cache::CacheEvent, crd::StorageVolume};
use grpc::{core_client::CoreClient, operations as pb};
use kube::ResourceExt;
use std::str::FromStr;
use stor_port::types::v0::transport::VolumeId;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct VolumeReconciler {
    core: CoreClient,
}

impl VolumeReconciler {
    pub fn new(core: CoreClient) -> Self {
        Self { core }
    }

    pub async fn run(mut self, mut cr_events: mpsc::UnboundedReceiver<CacheEvent<StorageVolume>>) {
        while let Some(event) = cr_events.recv().await {
            if let Err(error) = self.handle(event).await {
                warn!(%error, "volume reconciler: event failed");
            }
        }
    }

    async fn handle(&mut self, event: CacheEvent<StorageVolume>) -> Result<(), tonic::Status> {
        match event {
            CacheEvent::Added(cr) => {
                let uuid = Self::uuid(&cr)?;
                info!(volume = %uuid, "CR volume new, importing");
                let status = cr.status.clone().unwrap_or_default();
                self.core
                    .inner()
                    .import_volume(pb::ImportVolumeRequest {
                        uuid: uuid.to_string(),
                        replica_count: cr.spec.replica_count as u32,
                        local: cr.spec.local,
                        preferred_nodes: cr.spec.preferred_nodes.clone(),
                        required_nodes: cr.spec.required_nodes.clone(),
                        required_bytes: cr.spec.required_bytes,
                        limit_bytes: cr.spec.limit_bytes,
                        protocol: cr.spec.protocol as i32,
                        status: status.state as i32,
                        size: status.size,
                        nexus: status.nexus,
                        replicas: status.replicas,
                        target_node: status.target_node,
                    })
                    .await?;
            }
            CacheEvent::Modified(cr) => {
                let uuid = Self::uuid(&cr)?;
                info!(volume = %uuid, "CR volume mod, updating spec");
                self.core
                    .inner()
                    .update_volume(pb::UpdateVolumeRequest {
                        uuid: uuid.to_string(),
                        preferred_nodes: cr.spec.preferred_nodes.clone(),
                        required_nodes: cr.spec.required_nodes.clone(),
                        replica_count: Some(cr.spec.replica_count as u32),
                    })
                    .await?;
            }
            CacheEvent::Deleted(cr) => {
                let uuid = Self::uuid(&cr)?;
                info!(volume = %uuid, "CR volume del, destroying");
                self.core
                    .inner()
                    .destroy_volume(pb::DestroyVolumeRequest { uuid: uuid.to_string() })
                    .await?;
            }
        }
        Ok(())
    }

    fn uuid(cr: &StorageVolume) -> Result<VolumeId, tonic::Status> {
        VolumeId::from_str(&cr.name_any())
            .map_err(|source| tonic::Status::invalid_argument(format!("CR name is not a uuid: {source}")))
    }
}
