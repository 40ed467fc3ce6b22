//! A single Node's sync loop (§4.1): periodically lists Pools, Replicas and
//! Nexuses from the node's data-plane daemon and folds the result into the
//! Registry. After `bad_limit` consecutive failures the node is marked
//! offline and its resources cascade offline/faulted; a later successful
//! sync brings it back online.

use crate::{registry::Registry, registry::SyncConfig, workqueue::WorkQueue};
use grpc::node_client::NodeRpcClient;
use parking_lot::RwLock;
use rpc::node::v1 as v0;
use std::sync::Arc;
use stor_port::transport_api::SvcError;
use stor_port::types::v0::transport::{
    ChildStatus, NexusChild, NexusState, NexusStatus, NodeId, NodeState, NodeStatus, PoolState,
    PoolStatus, ReplicaProtocol, ReplicaState,
};
use tokio::sync::Notify;
use tracing::{info, warn};

struct Shared {
    state: NodeState,
    client: Option<NodeRpcClient>,
}

/// A handle the Registry keeps for a registered node: its sync task can be
/// stopped, its cached [`NodeState`] read, and its RPC client (if currently
/// connected) borrowed for direct calls the Volume Manager needs to make
/// (create/destroy replica, create/destroy/publish nexus).
pub struct NodeSyncHandle {
    endpoint: String,
    shared: Arc<RwLock<Shared>>,
    stop: Arc<Notify>,
    workqueue: WorkQueue,
}

impl NodeSyncHandle {
    pub fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
    pub fn node_state(&self) -> NodeState {
        self.shared.read().state.clone()
    }
    pub fn client(&self) -> Option<NodeRpcClient> {
        self.shared.read().client.clone()
    }
    pub fn workqueue(&self) -> WorkQueue {
        self.workqueue.clone()
    }
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

pub struct Node;

impl Node {
    pub fn spawn_sync(
        id: NodeId,
        grpc_endpoint: String,
        registry: Registry,
        sync: SyncConfig,
    ) -> NodeSyncHandle {
        let shared = Arc::new(RwLock::new(Shared {
            state: NodeState {
                id: id.clone(),
                grpc_endpoint: Some(grpc_endpoint.clone()),
                status: NodeStatus::Unknown,
            },
            client: None,
        }));
        let stop = Arc::new(Notify::new());
        let workqueue = WorkQueue::new();

        let task_shared = shared.clone();
        let task_stop = stop.clone();
        let task_endpoint = grpc_endpoint.clone();
        let task_queue = workqueue.clone();
        tokio::spawn(async move {
            run_sync_loop(id, task_endpoint, registry, sync, task_shared, task_stop, task_queue).await;
        });

        NodeSyncHandle {
            endpoint: grpc_endpoint,
            shared,
            stop,
            workqueue,
        }
    }
}

async fn run_sync_loop(
    id: NodeId,
    grpc_endpoint: String,
    registry: Registry,
    sync: SyncConfig,
    shared: Arc<RwLock<Shared>>,
    stop: Arc<Notify>,
    workqueue: WorkQueue,
) {
    let mut consecutive_failures: u32 = 0;
    loop {
        let cycle = async {
            match sync_once(&id, &grpc_endpoint, sync, &shared, &workqueue).await {
                Ok((pools, replicas, nexuses)) => {
                    consecutive_failures = 0;
                    let became_online = {
                        let mut shared = shared.write();
                        let was_offline = shared.state.status != NodeStatus::Online;
                        shared.state.status = NodeStatus::Online;
                        was_offline
                    };
                    if became_online {
                        info!(node = %id, "node sync succeeded, marking online");
                    }
                    registry.replace_pools(&id, pools);
                    registry.replace_replicas(&id, replicas);
                    registry.replace_nexuses(&id, nexuses);
                    tokio::time::sleep(sync.sync_period).await;
                }
                Err(error) => {
                    consecutive_failures += 1;
                    warn!(node = %id, %error, consecutive_failures, "node sync failed");
                    if consecutive_failures >= sync.bad_limit {
                        let went_offline = {
                            let mut shared = shared.write();
                            let was_online = shared.state.status != NodeStatus::Offline;
                            shared.state.status = NodeStatus::Offline;
                            shared.client = None;
                            was_online
                        };
                        if went_offline {
                            warn!(node = %id, "bad limit exceeded, marking offline");
                            registry.offline_node_resources(&id);
                        }
                    }
                    tokio::time::sleep(sync.sync_retry).await;
                }
            }
        };

        tokio::select! {
            _ = cycle => {}
            _ = stop.notified() => return,
        }
    }
}

type SyncResult = (Vec<PoolState>, Vec<ReplicaState>, Vec<NexusState>);

async fn sync_once(
    id: &NodeId,
    grpc_endpoint: &str,
    sync: SyncConfig,
    shared: &Arc<RwLock<Shared>>,
    workqueue: &WorkQueue,
) -> Result<SyncResult, SvcError> {
    let client = {
        let existing = shared.read().client.clone();
        match existing {
            Some(client) => client,
            None => {
                let client = NodeRpcClient::connect(grpc_endpoint, sync.rpc_deadline).await?;
                shared.write().client = Some(client.clone());
                client
            }
        }
    };

    // The Node's WorkQueue serializes this listing cycle against every
    // other outbound RPC to this node (§4.1, §5), so a sync cycle can never
    // interleave on the wire with a concurrent CSI-driven mutation.
    let id = id.clone();
    workqueue
        .submit(async move {
            let pools = list_pools(&id, &client).await?;
            let replicas = list_replicas(&id, &client).await?;
            let nexuses = list_nexuses(&id, &client).await?;
            Ok((pools, replicas, nexuses))
        })
        .await
}

async fn list_pools(node: &NodeId, client: &NodeRpcClient) -> Result<Vec<PoolState>, SvcError> {
    let mut pool_client = client.pool();
    let reply = client
        .call("ListPools", pool_client.list_pools(empty_request()))
        .await?;
    Ok(reply.pools.into_iter().map(|pool| to_pool_state(node, pool)).collect())
}

async fn list_replicas(node: &NodeId, client: &NodeRpcClient) -> Result<Vec<ReplicaState>, SvcError> {
    let mut replica_client = client.replica();
    let reply = client
        .call("ListReplicas", replica_client.list_replicas(empty_request()))
        .await?;
    Ok(reply
        .replicas
        .into_iter()
        .map(|replica| to_replica_state(node, replica))
        .collect())
}

async fn list_nexuses(node: &NodeId, client: &NodeRpcClient) -> Result<Vec<NexusState>, SvcError> {
    let mut nexus_client = client.nexus();
    let reply = client
        .call("ListNexus", nexus_client.list_nexus(empty_request()))
        .await?;
    Ok(reply.nexus.into_iter().map(|nexus| to_nexus_state(node, nexus)).collect())
}

fn empty_request<T: Default>() -> tonic::Request<T> {
    tonic::Request::new(T::default())
}

fn to_pool_state(node: &NodeId, pool: v0::Pool) -> PoolState {
    PoolState {
        id: pool.name.into(),
        node: node.clone(),
        disks: pool.disks,
        status: match v0::PoolState::try_from(pool.state).unwrap_or(v0::PoolState::PoolOffline) {
            v0::PoolState::PoolOnline => PoolStatus::Online,
            v0::PoolState::PoolDegraded => PoolStatus::Degraded,
            v0::PoolState::PoolOffline => PoolStatus::Offline,
        },
        capacity: pool.capacity,
        used: pool.used,
    }
}

fn to_replica_state(node: &NodeId, replica: v0::Replica) -> ReplicaState {
    ReplicaState {
        uuid: replica.uuid.parse().unwrap_or_default(),
        pool: replica.pool.into(),
        node: node.clone(),
        size: replica.size,
        share: match v0::ShareProtocol::try_from(replica.share).unwrap_or(v0::ShareProtocol::None) {
            v0::ShareProtocol::None => ReplicaProtocol::None,
            v0::ShareProtocol::Iscsi => ReplicaProtocol::Iscsi,
            v0::ShareProtocol::Nvmf => ReplicaProtocol::Nvmf,
        },
        uri: replica.uri,
        offline: false,
    }
}

fn to_nexus_state(node: &NodeId, nexus: v0::Nexus) -> NexusState {
    NexusState {
        uuid: nexus.uuid.parse().unwrap_or_default(),
        node: node.clone(),
        size: nexus.size,
        status: match v0::NexusState::try_from(nexus.state).unwrap_or(v0::NexusState::NexusOffline) {
            v0::NexusState::NexusOnline => NexusStatus::Online,
            v0::NexusState::NexusDegraded => NexusStatus::Degraded,
            v0::NexusState::NexusOffline => NexusStatus::Offline,
            v0::NexusState::NexusFaulted => NexusStatus::Faulted,
        },
        children: nexus
            .children
            .into_iter()
            .map(|child| NexusChild {
                uri: child.uri,
                status: match v0::ChildState::try_from(child.state).unwrap_or(v0::ChildState::ChildFaulted) {
                    v0::ChildState::ChildOnline => ChildStatus::Online,
                    v0::ChildState::ChildDegraded => ChildStatus::Degraded,
                    v0::ChildState::ChildFaulted => ChildStatus::Faulted,
                },
            })
            .collect(),
        device_uri: (!nexus.device_uri.is_empty()).then_some(nexus.device_uri),
    }
}
