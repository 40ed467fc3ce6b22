//! Integration coverage for the parts of the core agent that don't require
//! a live node-daemon connection: volume provisioning failure modes and
//! spec mutation.

use agents::registry::{Registry, SyncConfig};
use agents::volume::VolumeManager;
use pstor::MemStore;
use std::{sync::Arc, time::Duration};
use stor_port::transport_api::SvcError;
use stor_port::types::v0::transport::{NexusProtocol, VolumeId, VolumeSpec};

fn sync_config() -> SyncConfig {
    SyncConfig {
        sync_period: Duration::from_secs(5),
        sync_retry: Duration::from_secs(1),
        bad_limit: 3,
        rpc_deadline: Duration::from_millis(500),
    }
}

fn spec(replica_count: u8) -> VolumeSpec {
    VolumeSpec {
        uuid: VolumeId::new(),
        replica_count,
        local: false,
        preferred_nodes: Vec::new(),
        required_nodes: Vec::new(),
        required_bytes: 10 * 1024 * 1024,
        limit_bytes: 0,
        protocol: NexusProtocol::Nvmf,
    }
}

#[tokio::test]
async fn create_volume_with_no_registered_pools_is_resource_exhausted() {
    let registry = Registry::new(sync_config());
    let store = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry, store);

    let result = volumes.create_volume(spec(1), 10 * 1024 * 1024).await;
    assert!(matches!(result, Err(SvcError::ResourceExhausted { .. })));
}

#[tokio::test]
async fn create_volume_rejects_size_outside_spec_bounds() {
    let registry = Registry::new(sync_config());
    let store = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry, store);

    let mut spec = spec(1);
    spec.required_bytes = 10 * 1024 * 1024;
    spec.limit_bytes = 20 * 1024 * 1024;

    let result = volumes.create_volume(spec, 1024).await;
    assert!(matches!(result, Err(SvcError::InvalidArguments { .. })));
}

#[tokio::test]
async fn publish_unknown_volume_is_not_found() {
    let registry = Registry::new(sync_config());
    let store = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry, store);

    let unknown = stor_port::types::v0::transport::NodeId::new("node-1");
    let result = volumes.publish(&VolumeId::new(), &unknown).await;
    assert!(matches!(result, Err(SvcError::VolumeNotFound { .. })));
}

#[tokio::test]
async fn destroy_unknown_volume_is_not_found() {
    let registry = Registry::new(sync_config());
    let store = Arc::new(MemStore::new());
    let volumes = VolumeManager::new(registry, store);

    let result = volumes.destroy(&VolumeId::new()).await;
    assert!(matches!(result, Err(SvcError::VolumeNotFound { .. })));
}

#[tokio::test]
async fn registry_capacity_is_zero_with_no_pools() {
    let registry = Registry::new(sync_config());
    assert_eq!(registry.capacity(None), 0);
}
