//! Node CR reconciler (§4.5 reconciliation direction table). Registry state
//! is only reachable over gRPC from this process, so the Registry-to-CR
//! direction is driven by periodically polling `ListNodes` and diffing
//! against the previous poll; the CR-to-Registry direction is driven
//! directly off the resource cache's watch events.

use crate::{
    cache::{CacheEvent, ResourceCache},
    crd::{StorageNode, StorageNodeSpec, StorageNodeState, StorageNodeStatus},
};
use grpc::{core_client::CoreClient, operations as pb};
use kube::{api::ObjectMeta, ResourceExt};
use std::{collections::HashMap, time::Duration};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct NodeReconciler {
    core: CoreClient,
    cache: ResourceCache<StorageNode>,
}

impl NodeReconciler {
    pub fn new(core: CoreClient, cache: ResourceCache<StorageNode>) -> Self {
        Self { core, cache }
    }

    /// Drains CR watch events and registry polls on a single task so the
    /// two directions never interleave against the same node.
    pub async fn run(mut self, mut cr_events: mpsc::UnboundedReceiver<CacheEvent<StorageNode>>, poll_interval: Duration) {
        let mut known: HashMap<String, pb::NodeMsg> = HashMap::new();
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                event = cr_events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(error) = self.handle_cr_event(event).await {
                                warn!(%error, "node reconciler: CR event failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.poll_registry(&mut known).await {
                        warn!(%error, "node reconciler: registry poll failed");
                    }
                }
            }
        }
    }

    async fn handle_cr_event(&mut self, event: CacheEvent<StorageNode>) -> Result<(), tonic::Status> {
        match event {
            CacheEvent::Added(cr) => {
                let id = cr.name_any();
                info!(node = %id, "CR node new, calling Registry.addNode");
                self.core
                    .inner()
                    .add_node(pb::AddNodeRequest {
                        id,
                        grpc_endpoint: cr.spec.grpc_endpoint,
                    })
                    .await?;
            }
            CacheEvent::Deleted(cr) => {
                let id = cr.name_any();
                info!(node = %id, "CR node del, calling Registry.removeNode");
                self.core.inner().remove_node(pb::RemoveNodeRequest { id }).await?;
            }
            CacheEvent::Modified(_) => {}
        }
        Ok(())
    }

    async fn poll_registry(&mut self, known: &mut HashMap<String, pb::NodeMsg>) -> Result<(), tonic::Status> {
        let response = self
            .core
            .inner()
            .list_nodes(pb::ListNodesRequest {})
            .await?
            .into_inner();
        let current: HashMap<String, pb::NodeMsg> = response.nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        for (id, msg) in &current {
            let previously = known.get(id);
            if previously.is_none() || previously != Some(msg) {
                self.reconcile_node(id, msg).await;
            }
        }
        for id in known.keys() {
            if !current.contains_key(id) {
                info!(node = %id, "Registry node del, deleting CR");
                if let Err(error) = self.cache.delete(id).await {
                    warn!(node = %id, %error, "failed to delete node CR");
                }
            }
        }
        *known = current;
        Ok(())
    }

    async fn reconcile_node(&self, id: &str, msg: &pb::NodeMsg) {
        let endpoint = msg.grpc_endpoint.clone().unwrap_or_default();
        let existing = self.cache.get(id).await;
        if existing.is_none() {
            info!(node = %id, "Registry node new, creating CR");
            let cr = StorageNode {
                metadata: ObjectMeta {
                    name: Some(id.to_string()),
                    ..Default::default()
                },
                spec: StorageNodeSpec {
                    grpc_endpoint: endpoint.clone(),
                },
                status: Some(StorageNodeStatus::default()),
            };
            if let Err(error) = self.cache.create(&cr).await {
                warn!(node = %id, %error, "failed to create node CR");
                return;
            }
        } else if let Some(existing) = &existing {
            if existing.spec.grpc_endpoint != endpoint {
                if let Err(error) = self.cache.update(id, |cr| cr.spec.grpc_endpoint = endpoint.clone()).await {
                    warn!(node = %id, %error, "failed to update node CR endpoint");
                }
            }
        }

        // NodeStatusMsg wire codes: 0 unknown, 1 online, 2 offline (grpc/src/convert.rs).
        let online = msg.status == 1;
        let state = if online { StorageNodeState::Online } else { StorageNodeState::Offline };
        if let Err(error) = self
            .cache
            .update_status(id, |cr| {
                let status = cr.status.get_or_insert_with(StorageNodeStatus::default);
                status.state = state.clone();
            })
            .await
        {
            warn!(node = %id, %error, "failed to update node CR status");
        }
    }
}
