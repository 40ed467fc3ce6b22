//! Client for this workspace's own [`operations`](crate::operations) service,
//! used by the CSI controller and CRD reconcilers to reach the core agent.

use crate::operations::core_grpc_client::CoreGrpcClient;
use std::time::Duration;
use stor_port::transport_api::{Internal, NodeNotOnline, SvcError};
use tonic::transport::{Channel, Endpoint};

#[derive(Clone)]
pub struct CoreClient {
    inner: CoreGrpcClient<Channel>,
}

impl CoreClient {
    pub async fn connect(endpoint: &str, connect_timeout: Duration) -> Result<Self, SvcError> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|source| {
                Internal {
                    details: format!("invalid core endpoint '{endpoint}': {source}"),
                }
                .build()
            })?
            .connect_timeout(connect_timeout)
            .connect()
            .await
            .map_err(|_source| {
                NodeNotOnline {
                    node: endpoint.to_string(),
                }
                .build()
            })?;
        Ok(Self {
            inner: CoreGrpcClient::new(channel),
        })
    }

    pub fn inner(&self) -> CoreGrpcClient<Channel> {
        self.inner.clone()
    }
}
