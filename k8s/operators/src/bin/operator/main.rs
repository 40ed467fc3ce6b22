//! The `operator` binary: bridges the Node and Volume CRDs with the core
//! agent's Registry/Volume Manager over gRPC (§4.5).

use clap::Parser;
use grpc::core_client::CoreClient;
use k8s_operators::{
    cache::ResourceCache,
    config::OperatorConfig,
    crd::{StorageNode, StorageVolume},
    node_reconciler::NodeReconciler,
    volume_reconciler::VolumeReconciler,
};
use kube::api::Api;
use std::time::Duration;
use stor_port::transport_api::ErrorChain;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = OperatorConfig::parse();
    utils::tracing_telemetry::TracingTelemetry::builder().init("operator");

    let core = CoreClient::connect(&args.core_grpc_endpoint, Duration::from_secs(5))
        .await
        .unwrap_or_else(|error| panic!("failed to connect to the core agent: {}", error.full_string()));

    let client = kube::Client::try_default()
        .await
        .map_err(|error| anyhow::anyhow!("failed to build Kubernetes client: {error}"))?;

    let node_poll_interval = args.node_poll_interval;
    let watch_idle_timeout = args.watch_idle_timeout;
    let namespace = args.namespace.clone();
    OperatorConfig::initialize(args);

    let node_api: Api<StorageNode> = Api::namespaced(client.clone(), &namespace);
    let (node_cache, node_events) = ResourceCache::spawn(node_api, watch_idle_timeout);
    let node_reconciler = NodeReconciler::new(core.clone(), node_cache);

    let volume_api: Api<StorageVolume> = Api::namespaced(client, &namespace);
    let (_volume_cache, volume_events) = ResourceCache::spawn(volume_api, watch_idle_timeout);
    let volume_reconciler = VolumeReconciler::new(core);

    let node_task = tokio::spawn(node_reconciler.run(node_events, node_poll_interval));
    let volume_task = tokio::spawn(volume_reconciler.run(volume_events));

    tokio::select! {
        _ = shutdown::wait() => {}
        result = node_task => result.map_err(|error| anyhow::anyhow!("node reconciler panicked: {error}"))?,
        result = volume_task => result.map_err(|error| anyhow::anyhow!("volume reconciler panicked: {error}"))?,
    }
    Ok(())
}
