//! CLI configuration for the `csi-controller` binary (§1 Configuration).
//!
//! Every value is either required explicitly or carries a documented
//! default; there are no globals read elsewhere in the crate.

use clap::Parser;
use once_cell::sync::OnceCell;
use std::time::Duration;

fn parse_duration(src: &str) -> Result<Duration, humantime::DurationError> {
    src.parse::<humantime::Duration>().map(Into::into)
}

#[derive(Debug, Clone, Parser)]
#[clap(name = "csi-controller", about = "CSI controller plugin")]
pub struct CsiControllerConfig {
    /// Unix domain socket the CSI sidecar connects to.
    #[clap(long, default_value = "/var/run/csi.sock")]
    pub csi_socket: String,

    /// gRPC endpoint of the core control-plane agent.
    #[clap(long, default_value = "https://core:50051")]
    pub core_grpc_endpoint: String,

    /// Soft deadline applied to outgoing node RPC calls (§4.1), used as the
    /// default `ioTimeout` for `nvmf` volumes when a storage class omits it.
    #[clap(long, value_parser = parse_duration, default_value = "5s")]
    pub io_timeout: Duration,

    /// How long an idempotence-cache entry for an in-flight request is kept
    /// before a duplicate call is treated as a fresh one (§4.4).
    #[clap(long, value_parser = parse_duration, default_value = "30s")]
    pub dedup_ttl: Duration,
}

impl CsiControllerConfig {
    pub fn initialize(args: CsiControllerConfig) {
        CONFIG
            .set(args)
            .expect("CsiControllerConfig must only be initialised once");
    }

    pub fn get_config() -> &'static CsiControllerConfig {
        CONFIG.get().expect("CsiControllerConfig is not initialised")
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

static CONFIG: OnceCell<CsiControllerConfig> = OnceCell::new();
