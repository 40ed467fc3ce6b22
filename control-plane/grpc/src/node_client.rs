//! Soft-deadline client wrapper around the generated node-daemon bindings
//! (§4.1). Every call races its soft deadline independently of the
//! transport-level timeout, which is kept a second longer so a soft
//! deadline trip is attributed to the call and not masked by a generic
//! transport error.

use rpc::node::v1::{
    nexus_rpc_client::NexusRpcClient, pool_rpc_client::PoolRpcClient,
    replica_rpc_client::ReplicaRpcClient,
};
use std::time::Duration;
use stor_port::transport_api::{DeadlineExceeded, Internal, NodeNotOnline, SvcError};
use tonic::transport::{Channel, Endpoint};

const DEADLINE_SLACK: Duration = Duration::from_secs(1);

/// Per-operation transport deadlines (§5): 15 s default, 60 s for nexus
/// create/destroy, up to 1 h for replica destroy (data-plane daemons can
/// take a long time to zero and release the backing device).
const NEXUS_RPC_DEADLINE: Duration = Duration::from_secs(60);
const REPLICA_DESTROY_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// The deadline override for `method`, if §5 names one; `None` means the
/// client's configured default deadline applies.
fn operation_deadline(method: &str) -> Option<Duration> {
    match method {
        "CreateNexus" | "DestroyNexus" => Some(NEXUS_RPC_DEADLINE),
        "DestroyReplica" => Some(REPLICA_DESTROY_DEADLINE),
        _ => None,
    }
}

/// A connection to a single node's data-plane daemon, with calls bound by
/// the node sync engine's configured soft deadline (or the per-operation
/// override named in §5).
#[derive(Clone)]
pub struct NodeRpcClient {
    endpoint: String,
    channel: Channel,
    deadline: Duration,
}

impl NodeRpcClient {
    pub async fn connect(endpoint: &str, deadline: Duration) -> Result<Self, SvcError> {
        // The transport-level timeout must cover the longest possible
        // per-operation override, or a long-running replica destroy would
        // be cut off by the channel itself before its own soft deadline.
        let transport_timeout = REPLICA_DESTROY_DEADLINE + DEADLINE_SLACK;
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|source| Internal {
                details: format!("invalid node endpoint '{endpoint}': {source}"),
            }
            .build())?
            .connect_timeout(transport_timeout)
            .timeout(transport_timeout)
            .connect()
            .await
            .map_err(|_source| {
                NodeNotOnline {
                    node: endpoint.to_string(),
                }
                .build()
            })?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            channel,
            deadline,
        })
    }

    pub fn pool(&self) -> PoolRpcClient<Channel> {
        PoolRpcClient::new(self.channel.clone())
    }
    pub fn replica(&self) -> ReplicaRpcClient<Channel> {
        ReplicaRpcClient::new(self.channel.clone())
    }
    pub fn nexus(&self) -> NexusRpcClient<Channel> {
        NexusRpcClient::new(self.channel.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Race `fut` against its soft deadline: the per-operation override
    /// named in §5 for `method`, or this client's configured default. The
    /// transport-level timeout is always the longest possible override, so
    /// in the common case this soft deadline fires first and the error
    /// carries the offending method name.
    pub async fn call<T, F>(&self, method: &str, fut: F) -> Result<T, SvcError>
    where
        F: std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    {
        let deadline = operation_deadline(method).unwrap_or(self.deadline);
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(self.status_to_error(method, status)),
            Err(_) => Err(DeadlineExceeded {
                method: method.to_string(),
                endpoint: self.endpoint.clone(),
            }
            .build()),
        }
    }

    fn status_to_error(&self, method: &str, status: tonic::Status) -> SvcError {
        match status.code() {
            tonic::Code::DeadlineExceeded => DeadlineExceeded {
                method: method.to_string(),
                endpoint: self.endpoint.clone(),
            }
            .build(),
            tonic::Code::Unavailable | tonic::Code::Cancelled => NodeNotOnline {
                node: self.endpoint.clone(),
            }
            .build(),
            _ => Internal {
                details: format!("{method} on {}: {}", self.endpoint, status.message()),
            }
            .build(),
        }
    }
}
