//! The `csi-controller` binary: connects to the core agent, then serves the
//! CSI Identity and Controller services over a Unix domain socket (§4.4).

mod server;

use clap::Parser;
use csi_driver::{config::CsiControllerConfig, identity::Readiness};
use grpc::core_client::CoreClient;
use server::CsiServer;
use std::time::Duration;
use stor_port::transport_api::ErrorChain;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CsiControllerConfig::parse();
    utils::tracing_telemetry::TracingTelemetry::builder().init("csi-controller");

    let core = CoreClient::connect(&args.core_grpc_endpoint, Duration::from_secs(5))
        .await
        .unwrap_or_else(|error| panic!("failed to connect to the core agent: {}", error.full_string()));

    let csi_socket = args.csi_socket.clone();
    CsiControllerConfig::initialize(args);

    let readiness = Readiness::new();
    readiness.make_ready();

    CsiServer::run(&csi_socket, core, readiness)
        .await
        .map_err(|error| anyhow::anyhow!("CSI controller server failed: {error}"))
}
