//! The core agent binary: owns the Registry, starts the Volume Manager, and
//! serves [`CoreGrpc`](grpc::operations::core_grpc_server::CoreGrpc) until a
//! shutdown signal arrives.

mod config;

use agents::{
    grpc_service::CoreGrpcService,
    registry::{Registry, SyncConfig},
    volume::VolumeManager,
};
use clap::Parser;
use config::CoreArgs;
use grpc::operations::core_grpc_server::CoreGrpcServer;
use pstor::{EtcdStore, MemStore, Store};
use std::sync::Arc;
use stor_port::transport_api::ErrorChain;
use tonic::transport::Server;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let args = CoreArgs::parse();
    args.init_tracing();

    let store: Arc<dyn Store> = if args.etcd_endpoints.is_empty() {
        warn!("no etcd endpoints configured, running with an in-memory persistent store");
        Arc::new(MemStore::new())
    } else {
        let store = EtcdStore::new(args.etcd_endpoints.clone())
            .await
            .unwrap_or_else(|error| panic!("failed to connect to etcd: {}", error.full_string()));
        Arc::new(store)
    };

    let sync = SyncConfig {
        sync_period: args.sync_period,
        sync_retry: args.sync_retry,
        bad_limit: args.sync_bad_limit,
        rpc_deadline: args.rpc_deadline,
    };
    let registry = Registry::new(sync);
    let volumes = VolumeManager::new(registry.clone(), store);

    let addr = args
        .grpc_endpoint
        .parse()
        .unwrap_or_else(|error| panic!("invalid grpc_endpoint '{}': {error}", args.grpc_endpoint));

    info!(%addr, "core agent listening");
    let service = CoreGrpcService::new(registry, volumes);
    if let Err(error) = Server::builder()
        .add_service(CoreGrpcServer::new(service))
        .serve_with_shutdown(addr, shutdown::wait())
        .await
    {
        panic!("core agent server failed: {}", error.full_string());
    }
}
