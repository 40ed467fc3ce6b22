//! The Registry (§4.1/§4.2): the core agent's in-memory aggregate of every
//! Node's synced Pools, Replicas and Nexuses, plus Volume state. Nothing
//! here is persisted except nexus recovery info (§4.6) -- a restart rebuilds
//! this entirely from the data-plane on the next sync.

use crate::{
    event_stream::{EventStream, Subscription},
    node::{Node, NodeSyncHandle},
    workqueue::WorkQueue,
};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use stor_port::transport_api::{FailedPrecondition, PoolNotFound, ResourceExhausted, SvcError};
use stor_port::types::v0::transport::{
    NexusId, NexusState, NodeId, PoolId, PoolState, PoolStatus, ReplicaId, ReplicaState, VolumeSpec,
};

#[derive(Debug, Clone)]
pub enum ResourceEvent {
    NodeAdd(stor_port::types::v0::transport::NodeState),
    NodeMod(stor_port::types::v0::transport::NodeState),
    NodeDel(NodeId),
    PoolAdd(PoolState),
    PoolMod(PoolState),
    PoolDel(stor_port::types::v0::transport::PoolId),
    ReplicaAdd(ReplicaState),
    ReplicaMod(ReplicaState),
    ReplicaDel(ReplicaId),
    NexusAdd(NexusState),
    NexusMod(NexusState),
    NexusDel(NexusId),
    VolumeAdd(stor_port::types::v0::transport::VolumeState),
    VolumeMod(stor_port::types::v0::transport::VolumeState),
    VolumeDel(stor_port::types::v0::transport::VolumeId),
    /// Terminates the replay prefix for one node: everything that node owned
    /// at subscribe time has now been re-expressed as a `new` event (§4.2).
    NodeSync(NodeId),
}

/// Timing parameters for every Node's sync loop (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub sync_period: Duration,
    pub sync_retry: Duration,
    pub bad_limit: u32,
    pub rpc_deadline: Duration,
}

#[derive(Default)]
struct State {
    pools: HashMap<PoolKey, PoolState>,
    replicas: HashMap<ReplicaId, ReplicaState>,
    nexuses: HashMap<NexusId, NexusState>,
}

type PoolKey = (NodeId, stor_port::types::v0::transport::PoolId);

#[derive(Clone)]
pub struct Registry {
    nodes: Arc<RwLock<HashMap<NodeId, NodeSyncHandle>>>,
    state: Arc<RwLock<State>>,
    events: EventStream<ResourceEvent>,
    sync: SyncConfig,
}

impl Registry {
    pub fn new(sync: SyncConfig) -> Self {
        Self {
            nodes: Default::default(),
            state: Arc::new(RwLock::new(State::default())),
            events: EventStream::new(1024),
            sync,
        }
    }

    /// Open a replay-then-tail subscription (§4.2). The live tail is
    /// registered before the replay snapshot is taken, so no event
    /// published from this point on is missed; the replay itself is a
    /// synthesis of currently-known state, not a replay of historical raw
    /// events, so a subscriber always sees the full current state no matter
    /// how long the stream has been running. Per node, in a stable order:
    /// every replica, then every pool, then every nexus, then a `sync`
    /// terminator for that node.
    pub fn subscribe(&self) -> Subscription<ResourceEvent> {
        let mut sub = self.events.subscribe();
        sub.prepend(self.snapshot_as_events());
        sub
    }

    fn snapshot_as_events(&self) -> Vec<ResourceEvent> {
        let mut nodes: Vec<NodeId> = self.nodes.read().keys().cloned().collect();
        nodes.sort();

        let state = self.state.read();
        let mut replicas: Vec<&ReplicaState> = state.replicas.values().collect();
        replicas.sort_by_key(|r| r.uuid);
        let mut pools: Vec<&PoolState> = state.pools.values().collect();
        pools.sort_by(|a, b| a.node.cmp(&b.node).then_with(|| a.id.cmp(&b.id)));
        let mut nexuses: Vec<&NexusState> = state.nexuses.values().collect();
        nexuses.sort_by_key(|n| n.uuid);

        let mut events = Vec::new();
        for node in nodes {
            for replica in replicas.iter().filter(|r| r.node == node) {
                events.push(ResourceEvent::ReplicaAdd((*replica).clone()));
            }
            for pool in pools.iter().filter(|p| p.node == node) {
                events.push(ResourceEvent::PoolAdd((*pool).clone()));
            }
            for nexus in nexuses.iter().filter(|n| n.node == node) {
                events.push(ResourceEvent::NexusAdd((*nexus).clone()));
            }
            events.push(ResourceEvent::NodeSync(node));
        }
        events
    }

    /// Register (or re-register, on an endpoint change) a node and start
    /// its sync loop.
    pub fn register_node(&self, id: NodeId, grpc_endpoint: String) {
        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.get(&id) {
            if existing.endpoint() == grpc_endpoint {
                return;
            }
        }
        let handle = Node::spawn_sync(id.clone(), grpc_endpoint, self.clone(), self.sync);
        let state = handle.node_state();
        nodes.insert(id, handle);
        self.events.publish(ResourceEvent::NodeAdd(state));
    }

    /// Stop syncing a node and remove every resource it owned. A
    /// best-effort deletion event is emitted for the node itself before its
    /// listeners are detached; no further events are ever published about
    /// it afterwards.
    pub fn remove_node(&self, id: &NodeId) {
        let removed = self.nodes.write().remove(id);
        if let Some(handle) = removed {
            handle.stop();
        }
        let mut state = self.state.write();
        state.pools.retain(|(node, _), _| node != id);
        state.replicas.retain(|_, r| &r.node != id);
        state.nexuses.retain(|_, n| &n.node != id);
        drop(state);
        self.events.publish(ResourceEvent::NodeDel(id.clone()));
    }

    pub fn node_state(&self, id: &NodeId) -> Option<stor_port::types::v0::transport::NodeState> {
        self.nodes.read().get(id).map(NodeSyncHandle::node_state)
    }

    pub fn nodes(&self) -> Vec<stor_port::types::v0::transport::NodeState> {
        self.nodes.read().values().map(NodeSyncHandle::node_state).collect()
    }

    pub fn node_client(&self, id: &NodeId) -> Option<grpc::node_client::NodeRpcClient> {
        self.nodes.read().get(id).and_then(NodeSyncHandle::client)
    }

    /// The per-node WorkQueue every outbound RPC to `id` must be serialized
    /// through (§4.1/§5), shared with that node's own sync loop.
    pub fn node_workqueue(&self, id: &NodeId) -> Option<WorkQueue> {
        self.nodes.read().get(id).map(NodeSyncHandle::workqueue)
    }

    /// Issue a single node RPC through `id`'s WorkQueue, so it can never
    /// interleave on the wire with that node's sync loop or a concurrent
    /// mutation of the same node (§4.1, §5).
    pub async fn node_call<T, Fut>(
        &self,
        id: &NodeId,
        method: &'static str,
        build: impl FnOnce(grpc::node_client::NodeRpcClient) -> Fut + Send + 'static,
    ) -> Result<T, SvcError>
    where
        Fut: std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.node_client(id).ok_or_else(|| {
            FailedPrecondition { details: format!("node '{id}' is not online") }.build()
        })?;
        let queue = self.node_workqueue(id).ok_or_else(|| {
            FailedPrecondition { details: format!("node '{id}' is not online") }.build()
        })?;
        queue
            .submit(async move {
                let fut = build(client.clone());
                client.call(method, fut).await
            })
            .await
    }

    pub(crate) fn replace_pools(&self, node: &NodeId, pools: Vec<PoolState>) {
        let mut state = self.state.write();
        let seen: Vec<_> = pools.iter().map(|p| p.id.clone()).collect();
        state.pools.retain(|(n, id), _| n != node || seen.contains(id));
        for pool in pools {
            let key = (node.clone(), pool.id.clone());
            let event = match state.pools.get(&key) {
                Some(existing) if existing.status == pool.status && existing.used == pool.used => {
                    None
                }
                Some(_) => Some(ResourceEvent::PoolMod(pool.clone())),
                None => Some(ResourceEvent::PoolAdd(pool.clone())),
            };
            state.pools.insert(key, pool);
            if let Some(event) = event {
                drop(state);
                self.events.publish(event);
                state = self.state.write();
            }
        }
    }

    pub(crate) fn replace_replicas(&self, node: &NodeId, replicas: Vec<ReplicaState>) {
        let mut state = self.state.write();
        let seen: Vec<_> = replicas.iter().map(|r| r.uuid).collect();
        state
            .replicas
            .retain(|id, r| &r.node != node || seen.contains(id));
        for replica in replicas {
            let event = match state.replicas.get(&replica.uuid) {
                Some(existing) if existing.uri == replica.uri && existing.share == replica.share => {
                    None
                }
                Some(_) => Some(ResourceEvent::ReplicaMod(replica.clone())),
                None => Some(ResourceEvent::ReplicaAdd(replica.clone())),
            };
            state.replicas.insert(replica.uuid, replica);
            if let Some(event) = event {
                drop(state);
                self.events.publish(event);
                state = self.state.write();
            }
        }
    }

    pub(crate) fn replace_nexuses(&self, node: &NodeId, mut nexuses: Vec<NexusState>) {
        let mut state = self.state.write();
        let seen: Vec<_> = nexuses.iter().map(|n| n.uuid).collect();
        state.nexuses.retain(|id, n| &n.node != node || seen.contains(id));
        for fresh in nexuses.drain(..) {
            match state.nexuses.get_mut(&fresh.uuid) {
                Some(existing) => {
                    if existing.merge(fresh.clone()) {
                        let event = ResourceEvent::NexusMod(fresh);
                        drop(state);
                        self.events.publish(event);
                        state = self.state.write();
                    }
                }
                None => {
                    state.nexuses.insert(fresh.uuid, fresh.clone());
                    drop(state);
                    self.events.publish(ResourceEvent::NexusAdd(fresh));
                    state = self.state.write();
                }
            }
        }
    }

    /// Mark every resource owned by a node offline, cascading nexus
    /// children to faulted (spec §4.1 bad-limit cascade).
    pub(crate) fn offline_node_resources(&self, node: &NodeId) {
        let mut state = self.state.write();
        let mut mods = Vec::new();
        for (key, pool) in state.pools.iter_mut() {
            if &key.0 == node && pool.status != stor_port::types::v0::transport::PoolStatus::Offline {
                pool.status = stor_port::types::v0::transport::PoolStatus::Offline;
                mods.push(ResourceEvent::PoolMod(pool.clone()));
            }
        }
        for replica in state.replicas.values_mut() {
            if &replica.node == node && !replica.offline {
                replica.offline = true;
                mods.push(ResourceEvent::ReplicaMod(replica.clone()));
            }
        }
        for nexus in state.nexuses.values_mut() {
            if &nexus.node == node && nexus.offline() {
                mods.push(ResourceEvent::NexusMod(nexus.clone()));
            }
        }
        drop(state);
        for event in mods {
            self.events.publish(event);
        }
    }

    pub fn pool(&self, node: &NodeId, id: &stor_port::types::v0::transport::PoolId) -> Result<PoolState, SvcError> {
        self.state
            .read()
            .pools
            .get(&(node.clone(), id.clone()))
            .cloned()
            .ok_or_else(|| {
                PoolNotFound {
                    node: node.to_string(),
                    pool: id.to_string(),
                }
                .build()
            })
    }

    pub fn replicas(&self) -> Vec<ReplicaState> {
        self.state.read().replicas.values().cloned().collect()
    }

    pub fn replica(&self, id: &ReplicaId) -> Option<ReplicaState> {
        self.state.read().replicas.get(id).cloned()
    }

    pub fn nexus(&self, id: &NexusId) -> Option<NexusState> {
        self.state.read().nexuses.get(id).cloned()
    }

    /// Total free space across accessible pools, optionally scoped to a
    /// single node (spec §4.4 `getCapacity`).
    pub fn capacity(&self, node: Option<&NodeId>) -> u64 {
        self.state
            .read()
            .pools
            .values()
            .filter(|pool| pool.status.accessible())
            .filter(|pool| node.map_or(true, |n| &pool.node == n))
            .map(PoolState::free)
            .sum()
    }

    /// One accessible pool per node with enough free space for `size`,
    /// excluding any node in `exclude`, best candidate first. Precedence is
    /// (1) preferred node membership, (2) ONLINE before DEGRADED, (3) fewer
    /// existing replicas first, (4) more free space (§4.2 placement).
    fn candidate_pools(&self, spec: &VolumeSpec, size: u64, exclude: &[NodeId]) -> Vec<PoolState> {
        let state = self.state.read();
        let replica_counts: HashMap<PoolId, usize> = {
            let mut counts = HashMap::new();
            for replica in state.replicas.values() {
                *counts.entry(replica.pool.clone()).or_insert(0usize) += 1;
            }
            counts
        };
        let rank = |pool: &PoolState| -> (u8, usize) {
            let status_rank = match pool.status {
                PoolStatus::Online => 0,
                PoolStatus::Degraded => 1,
                PoolStatus::Offline => 2,
            };
            let replicas = replica_counts.get(&pool.id).copied().unwrap_or(0);
            (status_rank, replicas)
        };
        // Lower rank (status, then replica count) wins; free space only
        // breaks a tie within the same rank.
        let better = |a: &PoolState, b: &PoolState| -> bool {
            match rank(a).cmp(&rank(b)) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => a.free() > b.free(),
            }
        };

        let mut by_node: HashMap<NodeId, PoolState> = HashMap::new();
        for pool in state.pools.values() {
            if !pool.status.accessible() || pool.free() < size || exclude.contains(&pool.node) {
                continue;
            }
            let replace = match by_node.get(&pool.node) {
                Some(existing) => better(pool, existing),
                None => true,
            };
            if replace {
                by_node.insert(pool.node.clone(), pool.clone());
            }
        }
        drop(state);

        let mut candidates: Vec<PoolState> = by_node.into_values().collect();
        candidates.sort_by(|a, b| {
            let a_pref = spec.preferred_nodes.iter().position(|n| n == &a.node);
            let b_pref = spec.preferred_nodes.iter().position(|n| n == &b.node);
            match (a_pref, b_pref) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => rank(a).cmp(&rank(b)).then_with(|| b.free().cmp(&a.free())),
            }
        });
        candidates
    }

    /// Rank accessible pools for a new volume's replicas (§4.2 placement).
    /// Nodes named in `required_nodes` must all be used.
    pub fn choose_pools(&self, spec: &VolumeSpec, size: u64) -> Result<Vec<PoolState>, SvcError> {
        let mut candidates = self.candidate_pools(spec, size, &[]);

        let mut chosen = Vec::new();
        for node in &spec.required_nodes {
            match candidates.iter().position(|p| &p.node == node) {
                Some(index) => chosen.push(candidates.remove(index)),
                None => {
                    return ResourceExhausted {
                        requested_replicas: spec.replica_count,
                        found_pools: chosen.len(),
                    }
                    .fail()
                }
            }
        }

        for pool in candidates {
            if chosen.len() >= spec.replica_count as usize {
                break;
            }
            chosen.push(pool);
        }

        if chosen.len() < spec.replica_count as usize {
            return ResourceExhausted {
                requested_replicas: spec.replica_count,
                found_pools: chosen.len(),
            }
            .fail();
        }
        Ok(chosen)
    }

    /// Pick a single replacement pool for a volume that has lost a replica
    /// (§4.3 fault-handling table), excluding nodes that already host one of
    /// its surviving replicas.
    pub fn choose_replacement_pool(
        &self,
        spec: &VolumeSpec,
        size: u64,
        exclude: &[NodeId],
    ) -> Result<PoolState, SvcError> {
        self.candidate_pools(spec, size, exclude)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ResourceExhausted {
                    requested_replicas: 1,
                    found_pools: 0,
                }
                .build()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stor_port::types::v0::transport::{NexusChild, NexusStatus, ReplicaProtocol};

    fn registry() -> Registry {
        Registry::new(SyncConfig {
            sync_period: Duration::from_secs(60),
            sync_retry: Duration::from_secs(10),
            bad_limit: 3,
            rpc_deadline: Duration::from_secs(15),
        })
    }

    fn pool(node: &str, id: &str, status: PoolStatus, free: u64) -> PoolState {
        PoolState {
            id: id.into(),
            node: node.into(),
            disks: vec![],
            status,
            capacity: free,
            used: 0,
        }
    }

    fn spec(replica_count: u8) -> VolumeSpec {
        VolumeSpec {
            uuid: Default::default(),
            replica_count,
            local: false,
            preferred_nodes: vec![],
            required_nodes: vec![],
            required_bytes: 0,
            limit_bytes: 0,
            protocol: stor_port::types::v0::transport::NexusProtocol::Nvmf,
        }
    }

    #[test]
    fn choose_pools_prefers_online_over_degraded_even_with_less_free_space() {
        let registry = registry();
        registry.replace_pools(
            &"node-a".into(),
            vec![pool("node-a", "pool-a", PoolStatus::Degraded, 1_000_000)],
        );
        registry.replace_pools(
            &"node-b".into(),
            vec![pool("node-b", "pool-b", PoolStatus::Online, 10_000)],
        );

        let chosen = registry.choose_pools(&spec(1), 1_000).unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].id, "pool-b".into());
    }

    #[test]
    fn choose_pools_breaks_ties_on_free_space_only_within_equal_rank() {
        let registry = registry();
        registry.replace_pools(
            &"node-a".into(),
            vec![pool("node-a", "pool-a", PoolStatus::Online, 1_000)],
        );
        registry.replace_pools(
            &"node-b".into(),
            vec![pool("node-b", "pool-b", PoolStatus::Online, 10_000)],
        );

        let chosen = registry.choose_pools(&spec(1), 500).unwrap();
        assert_eq!(chosen[0].id, "pool-b".into());
    }

    #[test]
    fn choose_replacement_pool_excludes_nodes_already_used() {
        let registry = registry();
        registry.replace_pools(
            &"node-a".into(),
            vec![pool("node-a", "pool-a", PoolStatus::Online, 10_000)],
        );
        registry.replace_pools(
            &"node-b".into(),
            vec![pool("node-b", "pool-b", PoolStatus::Online, 10_000)],
        );

        let chosen = registry
            .choose_replacement_pool(&spec(1), 500, &["node-a".into()])
            .unwrap();
        assert_eq!(chosen.node, "node-b".into());
    }

    #[test]
    fn snapshot_emits_replica_then_pool_then_nexus_then_sync_per_node() {
        let registry = registry();
        registry.replace_pools(&"node-a".into(), vec![pool("node-a", "pool-a", PoolStatus::Online, 10_000)]);
        registry.replace_replicas(
            &"node-a".into(),
            vec![ReplicaState {
                uuid: ReplicaId::new(),
                pool: "pool-a".into(),
                node: "node-a".into(),
                size: 100,
                share: ReplicaProtocol::None,
                uri: String::new(),
                offline: false,
            }],
        );
        registry.replace_nexuses(
            &"node-a".into(),
            vec![NexusState {
                uuid: NexusId::new(),
                node: "node-a".into(),
                size: 100,
                status: NexusStatus::Online,
                children: vec![] as Vec<NexusChild>,
                device_uri: None,
            }],
        );

        let events = registry.snapshot_as_events();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                ResourceEvent::ReplicaAdd(_) => "replica",
                ResourceEvent::PoolAdd(_) => "pool",
                ResourceEvent::NexusAdd(_) => "nexus",
                ResourceEvent::NodeSync(_) => "sync",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["replica", "pool", "nexus", "sync"]);
    }
}
