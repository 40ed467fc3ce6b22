//! Core agent CLI configuration (ambient stack §1): node sync timing,
//! listen address, persistent-store endpoint and logging flags.

use clap::Parser;
use std::{str::FromStr, time::Duration};
use utils::tracing_telemetry::{FmtLayer, FmtStyle};

fn parse_duration(src: &str) -> Result<Duration, humantime::DurationError> {
    src.parse::<humantime::Duration>().map(Into::into)
}

fn parse_fmt_style(src: &str) -> Result<FmtStyle, strum::ParseError> {
    FmtStyle::from_str(src)
}

#[derive(Debug, Parser)]
#[command(name = "core", about = "Control plane core agent")]
pub struct CoreArgs {
    /// Address the CoreGrpc server binds to.
    #[arg(long, env = "CORE_GRPC_ENDPOINT", default_value = "0.0.0.0:50051")]
    pub grpc_endpoint: String,

    /// etcd endpoints for the persistent store; omit to run with an
    /// in-memory store (development/test only).
    #[arg(long, env = "ETCD_ENDPOINTS", value_delimiter = ',')]
    pub etcd_endpoints: Vec<String>,

    /// How often a healthy node is re-synced.
    #[arg(long, env = "SYNC_PERIOD", default_value = "60s", value_parser = parse_duration)]
    pub sync_period: Duration,

    /// How long to wait before retrying a failed node sync.
    #[arg(long, env = "SYNC_RETRY", default_value = "10s", value_parser = parse_duration)]
    pub sync_retry: Duration,

    /// Consecutive sync failures before a node is marked offline.
    #[arg(long, env = "SYNC_BAD_LIMIT", default_value_t = 3)]
    pub sync_bad_limit: u32,

    /// Default soft deadline applied to a node RPC with no per-operation
    /// override (§5 names 60 s for nexus create/destroy, up to 1 h for
    /// replica destroy; those are applied automatically regardless of this
    /// value).
    #[arg(long, env = "RPC_DEADLINE", default_value = "15s", value_parser = parse_duration)]
    pub rpc_deadline: Duration,

    #[arg(long, env = "FMT_STYLE", default_value = "pretty", value_parser = parse_fmt_style)]
    pub fmt_style: FmtStyle,

    #[arg(long, env = "ANSI_COLOURS", default_value_t = true)]
    pub ansi_colours: bool,

    /// Jaeger collector endpoint; when unset, only the fmt layer is active.
    #[arg(long, env = "JAEGER_ENDPOINT")]
    pub jaeger: Option<String>,
}

impl CoreArgs {
    pub fn init_tracing(&self) {
        utils::tracing_telemetry::TracingTelemetry::builder()
            .with_writer(FmtLayer::Stdout)
            .with_style(self.fmt_style)
            .with_colours(self.ansi_colours)
            .with_jaeger(self.jaeger.clone())
            .init("core-agent");
    }
}
