//! End-to-end scenarios against a real Registry + Volume Manager talking
//! gRPC to in-process mock data-plane daemons (spec §8).

use agents::{
    registry::{Registry, SyncConfig},
    volume::VolumeManager,
};
use pstor::{MemStore, Store};
use std::{sync::Arc, time::Duration};
use stor_port::types::v0::transport::{NexusProtocol, NodeId, NodeStatus, VolumeSpec};
use testlib::mock_node::MockNode;

fn fast_sync() -> SyncConfig {
    SyncConfig {
        sync_period: Duration::from_millis(20),
        sync_retry: Duration::from_millis(20),
        bad_limit: 2,
        rpc_deadline: Duration::from_secs(2),
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) {
    let start = tokio::time::Instant::now();
    loop {
        if check() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn registered_node(registry: &Registry, id: &str, node: &MockNode) {
    registry.register_node(NodeId::from(id), node.grpc_endpoint());
    wait_until(&format!("node '{id}' synced"), Duration::from_secs(5), || {
        registry.node_state(&NodeId::from(id)).map(|s| s.status) == Some(NodeStatus::Online)
    })
    .await;
}

fn spec(replica_count: u8, required_bytes: u64, required_nodes: Vec<&str>) -> VolumeSpec {
    VolumeSpec {
        uuid: Default::default(),
        replica_count,
        local: false,
        preferred_nodes: Vec::new(),
        required_nodes: required_nodes.into_iter().map(NodeId::from).collect(),
        required_bytes,
        limit_bytes: 0,
        protocol: NexusProtocol::Nvmf,
    }
}

#[tokio::test]
async fn create_publish_destroy() {
    let registry = Registry::new(fast_sync());
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry.clone(), store);

    let mut nodes = Vec::new();
    for name in ["n1", "n2", "n3"] {
        let node = MockNode::spawn().await;
        node.seed_pool("pool-1", 256 * 1024 * 1024, 0);
        registered_node(&registry, name, &node).await;
        nodes.push(node);
    }

    let spec = spec(3, 96 * 1024 * 1024, Vec::new());
    let uuid = spec.uuid;
    let state = volumes.create_volume(spec, 96 * 1024 * 1024).await.expect("create succeeds");
    assert_eq!(state.status, stor_port::types::v0::transport::VolumeStatus::Healthy);
    assert_eq!(state.replicas.len(), 3);

    let uri = volumes.publish(&uuid, &NodeId::from("n1")).await.expect("publish succeeds");
    assert!(uri.starts_with("nvmf://"), "unexpected device uri: {uri}");

    volumes.destroy(&uuid).await.expect("destroy succeeds");
    assert!(volumes.get(&uuid).is_none() || volumes.list().iter().all(|v| v.uuid != uuid));
    wait_until("replicas torn down on every node", Duration::from_secs(5), || {
        nodes.iter().all(|n| n.replica_count() == 0 && n.nexus_count() == 0)
    })
    .await;
}

#[tokio::test]
async fn required_node_placement() {
    let registry = Registry::new(fast_sync());
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry.clone(), store);

    let n1 = MockNode::spawn().await;
    n1.seed_pool("pool-1", 256 * 1024 * 1024, 0);
    registered_node(&registry, "n1", &n1).await;

    let n2 = MockNode::spawn().await;
    n2.seed_pool("pool-1", 256 * 1024 * 1024, 0);
    registered_node(&registry, "n2", &n2).await;

    let ok_spec = spec(1, 32 * 1024 * 1024, vec!["n2"]);
    let state = volumes.create_volume(ok_spec, 32 * 1024 * 1024).await.expect("create succeeds");
    assert_eq!(state.replicas.len(), 1);

    // n3 is required but was never registered: no accessible pool on it.
    let failing_spec = spec(1, 32 * 1024 * 1024, vec!["n3"]);
    let error = volumes
        .create_volume(failing_spec, 32 * 1024 * 1024)
        .await
        .expect_err("placement must fail when the required node has no pool");
    assert!(
        matches!(error.tonic_code(), tonic::Code::ResourceExhausted),
        "expected RESOURCE_EXHAUSTED, got {:?}",
        error.tonic_code()
    );
}

#[tokio::test]
async fn duplicate_create_is_idempotent() {
    let registry = Registry::new(fast_sync());
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry.clone(), store);

    let node = MockNode::spawn().await;
    node.seed_pool("pool-1", 256 * 1024 * 1024, 0);
    registered_node(&registry, "n1", &node).await;

    let spec = spec(1, 16 * 1024 * 1024, Vec::new());
    let first = volumes.create_volume(spec.clone(), 16 * 1024 * 1024).await.expect("first create succeeds");
    let second = volumes.create_volume(spec, 16 * 1024 * 1024).await.expect("second create succeeds");

    assert_eq!(first.uuid, second.uuid);
    assert_eq!(first.replicas, second.replicas);
    assert_eq!(volumes.list().iter().filter(|v| v.uuid == first.uuid).count(), 1);
}

#[tokio::test]
async fn sync_failure_cascade() {
    let registry = Registry::new(fast_sync());
    let node = MockNode::spawn().await;
    node.seed_pool("pool-1", 256 * 1024 * 1024, 0);
    registered_node(&registry, "n1", &node).await;

    node.set_unreachable(true);
    wait_until("node goes offline after repeated sync failures", Duration::from_secs(5), || {
        registry.node_state(&NodeId::from("n1")).map(|s| s.status) == Some(NodeStatus::Offline)
    })
    .await;

    node.set_unreachable(false);
    wait_until("node recovers on the next successful sync", Duration::from_secs(5), || {
        registry.node_state(&NodeId::from("n1")).map(|s| s.status) == Some(NodeStatus::Online)
    })
    .await;
}
