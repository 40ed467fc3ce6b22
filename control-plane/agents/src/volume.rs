//! The Volume Manager (§4.3): reconciles each Volume's desired `spec`
//! against the replicas/nexus actually observed through the Registry, and
//! serves the operations the CSI dispatcher and CRD reconcilers drive.
//!
//! Every mutation of a single volume, whether CSI-driven or triggered by a
//! Registry event, runs through that volume's own [`WorkQueue`] so the two
//! sources can never race each other.

use crate::{
    registry::{Registry, ResourceEvent},
    workqueue::WorkQueue,
};
use parking_lot::RwLock;
use pstor::Store;
use rpc::node::v1::{self as v0, NexusFrontendProtocol, ShareProtocol};
use std::{collections::HashMap, sync::Arc};
use stor_port::transport_api::{
    FailedPrecondition, Internal, InvalidArguments, ResourceExhausted, SvcError, VolumeNotFound,
};
use stor_port::types::v0::store::{ChildInfo, NexusInfo};
use stor_port::types::v0::transport::{
    NexusId, NexusProtocol, NexusStatus, NodeId, ReplicaId, VolumeId, VolumeSpec, VolumeState,
    VolumeStatus,
};
use tracing::{info, warn};

struct Entry {
    spec: VolumeSpec,
    state: VolumeState,
    queue: WorkQueue,
}

#[derive(Default)]
struct Index {
    volumes: HashMap<VolumeId, Entry>,
    by_replica: HashMap<ReplicaId, VolumeId>,
    by_nexus: HashMap<NexusId, VolumeId>,
}

/// Owns every Volume's spec/state pair and drives their reconciliation.
#[derive(Clone)]
pub struct VolumeManager {
    registry: Registry,
    store: Arc<dyn Store>,
    index: Arc<RwLock<Index>>,
}

impl VolumeManager {
    /// Build a manager and start its Registry event subscription. The
    /// returned manager is ready to serve `create_volume` etc. immediately;
    /// fault reconciliation runs in a detached background task.
    pub fn new(registry: Registry, store: Arc<dyn Store>) -> Self {
        let manager = Self {
            registry,
            store,
            index: Arc::new(RwLock::new(Index::default())),
        };
        manager.clone().spawn_event_loop();
        manager
    }

    fn spawn_event_loop(self) {
        tokio::spawn(async move {
            let mut sub = self.registry.subscribe();
            while let Some(event) = sub.next().await {
                self.handle_event(event).await;
            }
        });
    }

    async fn handle_event(&self, event: ResourceEvent) {
        match event {
            ResourceEvent::ReplicaDel(replica) => self.on_replica_lost(replica).await,
            ResourceEvent::ReplicaMod(replica) if replica.offline => {
                self.on_replica_lost(replica.uuid).await
            }
            ResourceEvent::NodeDel(node) => self.on_node_offline(node).await,
            ResourceEvent::NexusDel(nexus) => self.on_nexus_lost(nexus).await,
            ResourceEvent::NexusMod(nexus) if nexus.status == NexusStatus::Faulted => {
                self.on_nexus_faulted(nexus.uuid).await
            }
            _ => {}
        }
    }

    /// replica.del / replica.mod->offline (§4.3 fault-handling table): mark
    /// the volume degraded and schedule a replacement replica on a new pool.
    async fn on_replica_lost(&self, replica: ReplicaId) {
        let Some(volume) = self.index.read().by_replica.get(&replica).copied() else {
            return;
        };
        self.reconcile(volume, move |manager, entry| {
            entry.state.replicas.retain(|r| r != &replica);
            entry.state.status = if entry.state.replicas.is_empty() {
                VolumeStatus::Faulted
            } else {
                VolumeStatus::Degraded
            };
            manager.index.write().by_replica.remove(&replica);
            warn!(%volume, %replica, "replica lost, volume degraded");
        })
        .await;
        self.schedule_replacement_replica(volume).await;
    }

    /// pool.del / node offline (§4.3): every replica hosted on the affected
    /// scope is treated as offline, which in turn schedules its replacement
    /// exactly like a direct `replica.del` would.
    async fn on_node_offline(&self, node: NodeId) {
        let lost: Vec<(VolumeId, ReplicaId)> = {
            let index = self.index.read();
            index
                .volumes
                .values()
                .flat_map(|entry| {
                    let volume = entry.state.uuid;
                    entry
                        .state
                        .replicas
                        .iter()
                        .copied()
                        .filter(|replica| {
                            self.registry.replica(replica).map_or(false, |r| r.node == node)
                        })
                        .map(move |replica| (volume, replica))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        for (volume, replica) in lost {
            warn!(%volume, %node, %replica, "node offline, treating replica as lost");
            self.on_replica_lost(replica).await;
        }
    }

    /// nexus.del (§4.3): clear the nexus binding; if the volume is still
    /// published, re-create the nexus on the same target node.
    async fn on_nexus_lost(&self, nexus: NexusId) {
        let Some(volume) = self.index.read().by_nexus.get(&nexus).copied() else {
            return;
        };
        let target_node = {
            let index = self.index.read();
            index.volumes.get(&volume).and_then(|e| e.state.target_node.clone())
        };
        self.reconcile(volume, move |manager, entry| {
            entry.state.nexus = None;
            if entry.state.status == VolumeStatus::Healthy {
                entry.state.status = VolumeStatus::Degraded;
            }
            manager.index.write().by_nexus.remove(&nexus);
            warn!(%volume, %nexus, "nexus lost, clearing binding");
        })
        .await;
        if let Some(target_node) = target_node {
            if let Err(error) = self.publish(&volume, &target_node).await {
                warn!(%volume, %target_node, %error, "failed to re-create nexus after loss");
            }
        }
    }

    /// nexus.mod FAULTED (§4.3): if the nexus has fewer children than the
    /// volume's replica count, start a rebuild by adding a new replica.
    async fn on_nexus_faulted(&self, nexus_id: NexusId) {
        let Some(volume) = self.index.read().by_nexus.get(&nexus_id).copied() else {
            return;
        };
        self.reconcile(volume, move |_manager, entry| {
            if entry.state.status == VolumeStatus::Healthy {
                entry.state.status = VolumeStatus::Degraded;
            }
            warn!(%volume, %nexus_id, "nexus faulted, volume degraded pending rebuild");
        })
        .await;

        let Some(spec) = self.index.read().volumes.get(&volume).map(|e| e.spec.clone()) else {
            return;
        };
        let children = self.registry.nexus(&nexus_id).map_or(0, |n| n.children.len());
        if children < spec.replica_count as usize {
            self.schedule_replacement_replica(volume).await;
        }
    }

    /// Run replacement-replica creation on the volume's own WorkQueue, so it
    /// never races a concurrent CSI-driven mutation of the same volume.
    async fn schedule_replacement_replica(&self, volume: VolumeId) {
        let queue = match self.queue_for(&volume) {
            Ok(queue) => queue,
            Err(_) => return,
        };
        let manager = self.clone();
        let _ = queue
            .submit(async move { manager.replace_lost_replica(volume).await })
            .await;
    }

    /// Choose a fresh pool on a node not already hosting one of this
    /// volume's surviving replicas, create a replica there, and bind it to
    /// the volume. A no-op once the replica count is already satisfied, and
    /// best-effort when no replacement pool is available -- the volume stays
    /// DEGRADED/FAULTED until a later event retries it.
    async fn replace_lost_replica(&self, volume: VolumeId) -> Result<(), SvcError> {
        let (spec, state) = self.spec_and_state(&volume)?;
        if state.status == VolumeStatus::Destroyed || state.replicas.len() >= spec.replica_count as usize {
            return Ok(());
        }

        let used_nodes: Vec<NodeId> = state
            .replicas
            .iter()
            .filter_map(|r| self.registry.replica(r).map(|r| r.node))
            .collect();
        let pool = match self.registry.choose_replacement_pool(&spec, state.size, &used_nodes) {
            Ok(pool) => pool,
            Err(error) => {
                warn!(%volume, %error, "no replacement pool available, volume remains degraded");
                return Ok(());
            }
        };

        let request = v0::CreateReplicaRequest {
            uuid: ReplicaId::new().to_string(),
            pool: pool.id.to_string(),
            size: state.size,
        };
        let reply = self
            .registry
            .node_call(&pool.node, "CreateReplica", move |client| {
                let mut replica_client = client.replica();
                async move { replica_client.create_replica(tonic::Request::new(request)).await }
            })
            .await?;
        let Ok(new_replica) = reply.uuid.parse::<ReplicaId>() else {
            return Ok(());
        };

        let mut index = self.index.write();
        if let Some(entry) = index.volumes.get_mut(&volume) {
            entry.state.replicas.push(new_replica);
            if entry.state.replicas.len() >= entry.spec.replica_count as usize {
                entry.state.status = VolumeStatus::Healthy;
            }
        }
        index.by_replica.insert(new_replica, volume);
        drop(index);
        info!(%volume, replica = %new_replica, pool = %pool.id, "replacement replica created");
        Ok(())
    }

    /// Run `f` against a volume's entry on its own WorkQueue, so it never
    /// interleaves with a concurrent CSI-driven mutation of the same volume.
    async fn reconcile<F>(&self, volume: VolumeId, f: F)
    where
        F: FnOnce(&VolumeManager, &mut Entry) + Send + 'static,
    {
        let queue = match self.index.read().volumes.get(&volume) {
            Some(entry) => entry.queue.clone(),
            None => return,
        };
        let manager = self.clone();
        queue
            .submit(async move {
                if let Some(entry) = manager.index.write().volumes.get_mut(&volume) {
                    f(&manager, entry);
                }
            })
            .await;
    }

    pub fn get(&self, id: &VolumeId) -> Option<VolumeState> {
        self.index.read().volumes.get(id).map(|e| e.state.clone())
    }

    pub fn list(&self) -> Vec<VolumeState> {
        self.index.read().volumes.values().map(|e| e.state.clone()).collect()
    }

    /// Reconstruct a volume's spec/state from a CR without re-creating any
    /// replica or nexus (spec §4.5, CR `new` → `importVolume`). A second
    /// import for the same uuid is a no-op -- the in-memory entry always
    /// wins over a stale CR re-read.
    pub fn import_volume(&self, spec: VolumeSpec, state: VolumeState) {
        let mut index = self.index.write();
        if index.volumes.contains_key(&spec.uuid) {
            return;
        }
        for replica in &state.replicas {
            index.by_replica.insert(*replica, spec.uuid);
        }
        if let Some(nexus) = state.nexus {
            index.by_nexus.insert(nexus, spec.uuid);
        }
        let uuid = spec.uuid;
        index.volumes.insert(uuid, Entry { spec, state, queue: WorkQueue::new() });
        info!(volume = %uuid, "volume imported from CR");
    }

    /// Provisioning algorithm (§4.3 steps 1-6): choose pools, create one
    /// replica per pool, consult the persistent store for a previous nexus'
    /// recovery info, and land in `HEALTHY` or `DEGRADED`.
    pub async fn create_volume(&self, spec: VolumeSpec, size: u64) -> Result<VolumeState, SvcError> {
        if self.index.read().volumes.contains_key(&spec.uuid) {
            return self
                .get(&spec.uuid)
                .ok_or_else(|| Internal { details: "volume vanished mid-create".to_string() }.build());
        }
        if !spec.size_is_valid(size) {
            return InvalidArguments {
                details: format!("size {size} is out of bounds for volume '{}'", spec.uuid),
            }
            .fail();
        }

        // Visible as PENDING to any concurrent `get()` until provisioning
        // below lands it in HEALTHY or DEGRADED (§4.3 step 6).
        let queue = WorkQueue::new();
        self.index.write().volumes.insert(
            spec.uuid,
            Entry {
                spec: spec.clone(),
                state: VolumeState::pending(spec.uuid, size),
                queue: queue.clone(),
            },
        );

        match self.provision_replicas(&spec, size).await {
            Ok(state) => {
                let mut index = self.index.write();
                for replica in &state.replicas {
                    index.by_replica.insert(*replica, spec.uuid);
                }
                index.volumes.insert(spec.uuid, Entry { spec, state: state.clone(), queue });
                info!(volume = %state.uuid, status = ?state.status, "volume created");
                Ok(state)
            }
            Err(error) => {
                self.index.write().volumes.remove(&spec.uuid);
                Err(error)
            }
        }
    }

    async fn provision_replicas(&self, spec: &VolumeSpec, size: u64) -> Result<VolumeState, SvcError> {
        let pools = self.registry.choose_pools(spec, size)?;
        if pools.len() < spec.replica_count as usize {
            return ResourceExhausted {
                requested_replicas: spec.replica_count,
                found_pools: pools.len(),
            }
            .fail();
        }

        let mut created = Vec::new();
        for pool in &pools {
            let request = v0::CreateReplicaRequest {
                uuid: ReplicaId::new().to_string(),
                pool: pool.id.to_string(),
                size,
            };
            let reply = self
                .registry
                .node_call(&pool.node, "CreateReplica", move |client| {
                    let mut replica_client = client.replica();
                    async move { replica_client.create_replica(tonic::Request::new(request)).await }
                })
                .await?;
            created.push(reply);
        }

        let surviving: Vec<ReplicaId> = created.iter().filter_map(|r| r.uuid.parse().ok()).collect();

        let status = if surviving.len() == spec.replica_count as usize {
            VolumeStatus::Healthy
        } else {
            VolumeStatus::Degraded
        };

        Ok(VolumeState {
            uuid: spec.uuid,
            status,
            size,
            nexus: None,
            replicas: surviving,
            target_node: None,
            last_failure: None,
        })
    }

    /// Publish (§4.3): create or reuse a nexus on `target_node`, share every
    /// healthy replica appropriately, and return its device URI. Idempotent
    /// for repeated publish onto the same node; publishing elsewhere first
    /// unpublishes.
    pub async fn publish(&self, volume: &VolumeId, target_node: &NodeId) -> Result<String, SvcError> {
        let queue = self.queue_for(volume)?;
        let manager = self.clone();
        let volume = *volume;
        let target_node = target_node.clone();
        queue.submit(async move { manager.publish_inner(volume, target_node).await }).await
    }

    async fn publish_inner(&self, volume: VolumeId, target_node: NodeId) -> Result<String, SvcError> {
        let (spec, state) = self.spec_and_state(&volume)?;

        if let Some(current_node) = &state.target_node {
            if current_node == &target_node {
                if let Some(nexus) = state.nexus {
                    if let Some(uri) = self.registry.nexus(&nexus).and_then(|n| n.device_uri) {
                        return Ok(uri);
                    }
                }
            } else {
                // Already running on this volume's WorkQueue -- call the
                // inner helper directly, never `unpublish()` itself, which
                // would deadlock trying to resubmit onto the same queue.
                self.unpublish_inner(volume).await?;
            }
        }

        let nexus_id = state.nexus.unwrap_or_default();
        let local = state
            .replicas
            .iter()
            .find(|r| self.registry.replica(r).map_or(false, |rep| rep.node == target_node))
            .copied();
        let candidates = pstor::filter_replicas(self.store.as_ref(), &nexus_id, &state.replicas, local)
            .await
            .map_err(|source| Internal { details: source.to_string() }.build())?;

        let mut children = Vec::new();
        for replica_id in &candidates {
            let Some(replica) = self.registry.replica(replica_id) else { continue };
            let uri = if replica.node == target_node {
                replica.uri
            } else {
                let replica_id = *replica_id;
                let result = self
                    .registry
                    .node_call(&replica.node, "ShareReplica", move |client| {
                        let mut share_client = client.replica();
                        async move {
                            share_client
                                .share_replica(tonic::Request::new(v0::ShareReplicaRequest {
                                    uuid: replica_id.to_string(),
                                    share: ShareProtocol::Nvmf as i32,
                                }))
                                .await
                        }
                    })
                    .await;
                match result {
                    Ok(shared) => shared.uri,
                    Err(error) => {
                        warn!(%replica_id, %error, "failed to share replica, skipping child");
                        continue;
                    }
                }
            };
            children.push(uri);
        }

        if children.is_empty() {
            return FailedPrecondition {
                details: format!("volume '{volume}' has no healthy replicas to publish"),
            }
            .fail();
        }

        let create_request = v0::CreateNexusRequest {
            uuid: nexus_id.to_string(),
            size: state.size,
            children,
        };
        let nexus = self
            .registry
            .node_call(&target_node, "CreateNexus", move |client| {
                let mut nexus_client = client.nexus();
                async move { nexus_client.create_nexus(tonic::Request::new(create_request)).await }
            })
            .await?;

        let frontend = match spec.protocol {
            NexusProtocol::Nbd => NexusFrontendProtocol::Nbd,
            NexusProtocol::Iscsi => NexusFrontendProtocol::FrontendIscsi,
            NexusProtocol::Nvmf => NexusFrontendProtocol::FrontendNvmf,
        };
        let publish_request = v0::PublishNexusRequest {
            uuid: nexus.uuid.clone(),
            protocol: frontend as i32,
        };
        let published = self
            .registry
            .node_call(&target_node, "PublishNexus", move |client| {
                let mut nexus_client = client.nexus();
                async move { nexus_client.publish_nexus(tonic::Request::new(publish_request)).await }
            })
            .await?;

        self.store_nexus_info(&nexus_id, &candidates).await?;

        let mut index = self.index.write();
        if let Some(entry) = index.volumes.get_mut(&volume) {
            entry.state.nexus = Some(nexus_id);
            entry.state.target_node = Some(target_node);
            entry.state.status = VolumeStatus::Healthy;
        }
        index.by_nexus.insert(nexus_id, volume);
        info!(%volume, device_uri = %published.device_uri, "volume published");
        Ok(published.device_uri)
    }

    async fn store_nexus_info(&self, nexus: &NexusId, replicas: &[ReplicaId]) -> Result<(), SvcError> {
        let info = NexusInfo {
            clean_shutdown: true,
            children: replicas.iter().map(|uuid| ChildInfo { uuid: *uuid, healthy: true }).collect(),
        };
        pstor::put_nexus_info(self.store.as_ref(), nexus, &info)
            .await
            .map_err(|source| Internal { details: source.to_string() }.build())
    }

    /// Best-effort: an unreachable node never blocks unpublish/destroy.
    pub async fn unpublish(&self, volume: &VolumeId) -> Result<(), SvcError> {
        let queue = self.queue_for(volume)?;
        let manager = self.clone();
        let volume = *volume;
        queue.submit(async move { manager.unpublish_inner(volume).await }).await
    }

    async fn unpublish_inner(&self, volume: VolumeId) -> Result<(), SvcError> {
        let (_, state) = self.spec_and_state(&volume)?;
        if let (Some(nexus), Some(node)) = (state.nexus, &state.target_node) {
            let request = v0::UnpublishNexusRequest { uuid: nexus.to_string() };
            let _ = self
                .registry
                .node_call(node, "UnpublishNexus", move |client| {
                    let mut nexus_client = client.nexus();
                    async move { nexus_client.unpublish_nexus(tonic::Request::new(request)).await }
                })
                .await;
            self.index.write().by_nexus.remove(&nexus);
        }
        if let Some(entry) = self.index.write().volumes.get_mut(&volume) {
            entry.state.target_node = None;
        }
        Ok(())
    }

    /// Destroy (§4.3): unpublish, destroy the nexus, destroy every replica,
    /// then the persistent store entry, then latch `DESTROYED`.
    pub async fn destroy(&self, volume: &VolumeId) -> Result<(), SvcError> {
        let queue = self.queue_for(volume)?;
        let manager = self.clone();
        let volume = *volume;
        queue.submit(async move { manager.destroy_inner(volume).await }).await
    }

    async fn destroy_inner(&self, volume: VolumeId) -> Result<(), SvcError> {
        let (_, state) = self.spec_and_state(&volume)?;
        if state.status == VolumeStatus::Destroyed {
            return Ok(());
        }

        self.unpublish_inner(volume).await?;

        if let Some(nexus) = state.nexus {
            if let Some(node) = &state.target_node {
                let request = v0::DestroyNexusRequest { uuid: nexus.to_string() };
                let _ = self
                    .registry
                    .node_call(node, "DestroyNexus", move |client| {
                        let mut nexus_client = client.nexus();
                        async move { nexus_client.destroy_nexus(tonic::Request::new(request)).await }
                    })
                    .await;
            }
            let _ = pstor::destroy_nexus(self.store.as_ref(), &nexus).await;
        }

        for replica_id in &state.replicas {
            if let Some(replica) = self.registry.replica(replica_id) {
                let request = v0::DestroyReplicaRequest { uuid: replica_id.to_string() };
                let _ = self
                    .registry
                    .node_call(&replica.node, "DestroyReplica", move |client| {
                        let mut replica_client = client.replica();
                        async move { replica_client.destroy_replica(tonic::Request::new(request)).await }
                    })
                    .await;
            }
            self.index.write().by_replica.remove(replica_id);
        }

        let mut index = self.index.write();
        if let Some(entry) = index.volumes.get_mut(&volume) {
            entry.state.status = VolumeStatus::Destroyed;
            entry.state.replicas.clear();
            entry.state.nexus = None;
        }
        info!(%volume, "volume destroyed");
        Ok(())
    }

    /// Update a volume's spec (§4.3): preferred/required nodes affect
    /// scheduling only (required-nodes migration is scheduled, not done
    /// inline); `replicaCount` changes are left for the next reconcile pass
    /// triggered by a Registry event. Size is immutable and rejected here.
    pub fn update_spec(
        &self,
        volume: &VolumeId,
        preferred_nodes: Option<Vec<NodeId>>,
        required_nodes: Option<Vec<NodeId>>,
        replica_count: Option<u8>,
    ) -> Result<VolumeSpec, SvcError> {
        let mut index = self.index.write();
        let entry = index
            .volumes
            .get_mut(volume)
            .ok_or_else(|| VolumeNotFound { uuid: volume.to_string() }.build())?;
        if let Some(preferred) = preferred_nodes {
            entry.spec.preferred_nodes = preferred;
        }
        if let Some(required) = required_nodes {
            entry.spec.required_nodes = required;
        }
        if let Some(count) = replica_count {
            entry.spec.replica_count = count;
        }
        Ok(entry.spec.clone())
    }

    fn queue_for(&self, volume: &VolumeId) -> Result<WorkQueue, SvcError> {
        self.index
            .read()
            .volumes
            .get(volume)
            .map(|e| e.queue.clone())
            .ok_or_else(|| VolumeNotFound { uuid: volume.to_string() }.build())
    }

    fn spec_and_state(&self, volume: &VolumeId) -> Result<(VolumeSpec, VolumeState), SvcError> {
        self.index
            .read()
            .volumes
            .get(volume)
            .map(|e| (e.spec.clone(), e.state.clone()))
            .ok_or_else(|| VolumeNotFound { uuid: volume.to_string() }.build())
    }
}
