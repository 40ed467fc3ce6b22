//! CLI configuration for the `operator` binary (§1 Configuration).

use clap::Parser;
use once_cell::sync::OnceCell;
use std::time::Duration;

fn parse_duration(src: &str) -> Result<Duration, humantime::DurationError> {
    src.parse::<humantime::Duration>().map(Into::into)
}

#[derive(Debug, Clone, Parser)]
#[clap(name = "operator", about = "CRD reconciler bridge")]
pub struct OperatorConfig {
    /// gRPC endpoint of the core control-plane agent.
    #[clap(long, default_value = "https://core:50051")]
    pub core_grpc_endpoint: String,

    /// Namespace the node/volume CRDs are reconciled in.
    #[clap(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Interval between `ListNodes` polls used to drive the Registry-to-CR
    /// direction of the node reconciler (§4.5); there is no gRPC push
    /// mechanism for Registry-originated node events.
    #[clap(long, value_parser = parse_duration, default_value = "5s")]
    pub node_poll_interval: Duration,

    /// If no watch event is observed for this long, the resource cache
    /// tears down and restarts its watch (§4.5 idle-timeout restart).
    #[clap(long, value_parser = parse_duration, default_value = "10m")]
    pub watch_idle_timeout: Duration,
}

impl OperatorConfig {
    pub fn initialize(args: OperatorConfig) {
        CONFIG.set(args).expect("OperatorConfig must only be initialised once");
    }

    pub fn get_config() -> &'static OperatorConfig {
        CONFIG.get().expect("OperatorConfig is not initialised")
    }
}

static CONFIG: OnceCell<OperatorConfig> = OnceCell::new();
