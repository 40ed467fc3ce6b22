//! An in-process stand-in for a storage node's data-plane daemon,
//! implementing the same `PoolRpc`/`ReplicaRpc`/`NexusRpc` surface the real
//! daemon serves (see `rpc/proto/node.proto`). Used to exercise the control
//! plane's Node sync engine and Volume Manager end to end without a real
//! data-plane process.

use parking_lot::Mutex;
use rpc::node::v1::{
    self as v0, nexus_rpc_server::NexusRpc, pool_rpc_server::PoolRpc, replica_rpc_server::ReplicaRpc,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tonic::{Request, Response, Status};

#[derive(Default)]
struct State {
    pools: HashMap<String, v0::Pool>,
    replicas: HashMap<String, v0::Replica>,
    nexus: HashMap<String, v0::Nexus>,
    /// Set by tests to simulate a node that stops answering (§8 scenario 5).
    unreachable: bool,
}

/// A handle to a running mock node. Dropping it stops the server.
pub struct MockNode {
    state: Arc<Mutex<State>>,
    addr: SocketAddr,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl MockNode {
    /// Binds an ephemeral TCP port and starts serving immediately.
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(State::default()));
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let svc = MockNodeSvc { state: state.clone() };
        tokio::spawn(async move {
            let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
            let _ = tonic::transport::Server::builder()
                .add_service(rpc::node::v1::pool_rpc_server::PoolRpcServer::new(svc.clone()))
                .add_service(rpc::node::v1::replica_rpc_server::ReplicaRpcServer::new(svc.clone()))
                .add_service(rpc::node::v1::nexus_rpc_server::NexusRpcServer::new(svc))
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self { state, addr, shutdown: shutdown_tx }
    }

    /// `grpc://127.0.0.1:<port>` endpoint the Node sync engine connects to.
    pub fn grpc_endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn seed_pool(&self, name: &str, capacity: u64, used: u64) {
        self.state.lock().pools.insert(
            name.to_string(),
            v0::Pool {
                name: name.to_string(),
                disks: vec![format!("/dev/{name}")],
                state: v0::PoolState::PoolOnline as i32,
                capacity,
                used,
            },
        );
    }

    /// Simulates the node going dark: every subsequent RPC fails (§8
    /// scenario 5). Calling this again with `false` restores connectivity.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }

    pub fn nexus_count(&self) -> usize {
        self.state.lock().nexus.len()
    }

    pub fn stop(self) {
        let _ = self.shutdown.send(());
    }
}

#[derive(Clone)]
struct MockNodeSvc {
    state: Arc<Mutex<State>>,
}

fn unreachable_check(state: &State) -> Result<(), Status> {
    if state.unreachable {
        Err(Status::unavailable("mock node is unreachable"))
    } else {
        Ok(())
    }
}

#[tonic::async_trait]
impl PoolRpc for MockNodeSvc {
    async fn list_pools(&self, _request: Request<v0::ListPoolsRequest>) -> Result<Response<v0::ListPoolsReply>, Status> {
        let state = self.state.lock();
        unreachable_check(&state)?;
        Ok(Response::new(v0::ListPoolsReply { pools: state.pools.values().cloned().collect() }))
    }

    async fn create_pool(&self, request: Request<v0::CreatePoolRequest>) -> Result<Response<v0::Pool>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let pool = v0::Pool {
            name: req.name.clone(),
            disks: req.disks,
            state: v0::PoolState::PoolOnline as i32,
            capacity: 0,
            used: 0,
        };
        state.pools.insert(req.name, pool.clone());
        Ok(Response::new(pool))
    }

    async fn destroy_pool(&self, request: Request<v0::DestroyPoolRequest>) -> Result<Response<v0::Empty>, Status> {
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        state.pools.remove(&request.into_inner().name);
        Ok(Response::new(v0::Empty {}))
    }
}

#[tonic::async_trait]
impl ReplicaRpc for MockNodeSvc {
    async fn list_replicas(
        &self,
        _request: Request<v0::ListReplicasRequest>,
    ) -> Result<Response<v0::ListReplicasReply>, Status> {
        let state = self.state.lock();
        unreachable_check(&state)?;
        Ok(Response::new(v0::ListReplicasReply { replicas: state.replicas.values().cloned().collect() }))
    }

    async fn create_replica(&self, request: Request<v0::CreateReplicaRequest>) -> Result<Response<v0::Replica>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        if let Some(pool) = state.pools.get_mut(&req.pool) {
            pool.used += req.size;
        }
        let replica = v0::Replica {
            uuid: req.uuid.clone(),
            pool: req.pool,
            size: req.size,
            share: v0::ShareProtocol::None as i32,
            uri: format!("bdev:///{}", req.uuid),
        };
        state.replicas.insert(req.uuid, replica.clone());
        Ok(Response::new(replica))
    }

    async fn destroy_replica(&self, request: Request<v0::DestroyReplicaRequest>) -> Result<Response<v0::Empty>, Status> {
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        state.replicas.remove(&request.into_inner().uuid);
        Ok(Response::new(v0::Empty {}))
    }

    async fn share_replica(&self, request: Request<v0::ShareReplicaRequest>) -> Result<Response<v0::Replica>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let replica = state
            .replicas
            .get_mut(&req.uuid)
            .ok_or_else(|| Status::not_found(format!("replica '{}' not found", req.uuid)))?;
        replica.share = req.share;
        replica.uri = match v0::ShareProtocol::try_from(req.share).unwrap_or(v0::ShareProtocol::None) {
            v0::ShareProtocol::None => format!("bdev:///{}", req.uuid),
            v0::ShareProtocol::Iscsi => format!("iscsi://127.0.0.1/{}", req.uuid),
            v0::ShareProtocol::Nvmf => format!("nvmf://127.0.0.1/{}", req.uuid),
        };
        Ok(Response::new(replica.clone()))
    }

    async fn unshare_replica(&self, request: Request<v0::UnshareReplicaRequest>) -> Result<Response<v0::Replica>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let replica = state
            .replicas
            .get_mut(&req.uuid)
            .ok_or_else(|| Status::not_found(format!("replica '{}' not found", req.uuid)))?;
        replica.share = v0::ShareProtocol::None as i32;
        replica.uri = format!("bdev:///{}", req.uuid);
        Ok(Response::new(replica.clone()))
    }
}

#[tonic::async_trait]
impl NexusRpc for MockNodeSvc {
    async fn list_nexus(&self, _request: Request<v0::ListNexusRequest>) -> Result<Response<v0::ListNexusReply>, Status> {
        let state = self.state.lock();
        unreachable_check(&state)?;
        Ok(Response::new(v0::ListNexusReply { nexus: state.nexus.values().cloned().collect() }))
    }

    async fn create_nexus(&self, request: Request<v0::CreateNexusRequest>) -> Result<Response<v0::Nexus>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let children = req
            .children
            .into_iter()
            .map(|uri| v0::Child { uri, state: v0::ChildState::ChildOnline as i32 })
            .collect();
        let nexus = v0::Nexus {
            uuid: req.uuid.clone(),
            size: req.size,
            state: v0::NexusState::NexusOnline as i32,
            children,
            device_uri: String::new(),
        };
        state.nexus.insert(req.uuid, nexus.clone());
        Ok(Response::new(nexus))
    }

    async fn destroy_nexus(&self, request: Request<v0::DestroyNexusRequest>) -> Result<Response<v0::Empty>, Status> {
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        state.nexus.remove(&request.into_inner().uuid);
        Ok(Response::new(v0::Empty {}))
    }

    async fn add_child_nexus(&self, request: Request<v0::AddChildNexusRequest>) -> Result<Response<v0::Nexus>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let nexus = state
            .nexus
            .get_mut(&req.uuid)
            .ok_or_else(|| Status::not_found(format!("nexus '{}' not found", req.uuid)))?;
        nexus.children.push(v0::Child { uri: req.uri, state: v0::ChildState::ChildOnline as i32 });
        Ok(Response::new(nexus.clone()))
    }

    async fn remove_child_nexus(
        &self,
        request: Request<v0::RemoveChildNexusRequest>,
    ) -> Result<Response<v0::Nexus>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let nexus = state
            .nexus
            .get_mut(&req.uuid)
            .ok_or_else(|| Status::not_found(format!("nexus '{}' not found", req.uuid)))?;
        nexus.children.retain(|c| c.uri != req.uri);
        Ok(Response::new(nexus.clone()))
    }

    async fn publish_nexus(
        &self,
        request: Request<v0::PublishNexusRequest>,
    ) -> Result<Response<v0::PublishNexusReply>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        let protocol = v0::NexusFrontendProtocol::try_from(req.protocol).unwrap_or(v0::NexusFrontendProtocol::Nbd);
        let scheme = match protocol {
            v0::NexusFrontendProtocol::Nbd => "nbd",
            v0::NexusFrontendProtocol::FrontendIscsi => "iscsi",
            v0::NexusFrontendProtocol::FrontendNvmf => "nvmf",
        };
        let device_uri = format!("{scheme}://127.0.0.1/nqn.mock:nexus-{}", req.uuid);
        if let Some(nexus) = state.nexus.get_mut(&req.uuid) {
            nexus.device_uri = device_uri.clone();
        }
        Ok(Response::new(v0::PublishNexusReply { device_uri }))
    }

    async fn unpublish_nexus(&self, request: Request<v0::UnpublishNexusRequest>) -> Result<Response<v0::Empty>, Status> {
        let req = request.into_inner();
        let mut state = self.state.lock();
        unreachable_check(&state)?;
        if let Some(nexus) = state.nexus.get_mut(&req.uuid) {
            nexus.device_uri.clear();
        }
        Ok(Response::new(v0::Empty {}))
    }
}
