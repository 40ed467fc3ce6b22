//! CSI Identity service (§4.4). Served immediately on bind, independent of
//! Controller readiness -- the orchestrator probes Identity to decide
//! whether the sidecar should keep waiting on this plugin at all.

use crate::csi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Shared readiness flag flipped by `makeReady`/`undoReady` (§4.4, §5
/// Cancellation/timeouts). `Probe` reports it; `CsiControllerSvc` consults
/// the same handle to reject Controller RPCs while unready.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn make_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn undo_ready(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CsiIdentitySvc {
    readiness: Readiness,
}

impl CsiIdentitySvc {
    pub fn new(readiness: Readiness) -> Self {
        Self { readiness }
    }
}

#[tonic::async_trait]
impl csi::identity_server::Identity for CsiIdentitySvc {
    async fn get_plugin_info(
        &self,
        _request: Request<csi::GetPluginInfoRequest>,
    ) -> Result<Response<csi::GetPluginInfoResponse>, Status> {
        Ok(Response::new(csi::GetPluginInfoResponse {
            name: "io.openebs.csi-control-plane".to_string(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            manifest: Default::default(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<csi::GetPluginCapabilitiesRequest>,
    ) -> Result<Response<csi::GetPluginCapabilitiesResponse>, Status> {
        use csi::plugin_capability::{service::Type as ServiceType, Service, Type};
        Ok(Response::new(csi::GetPluginCapabilitiesResponse {
            capabilities: vec![
                csi::PluginCapability {
                    r#type: Some(Type::Service(Service {
                        r#type: ServiceType::ControllerService as i32,
                    })),
                },
                csi::PluginCapability {
                    r#type: Some(Type::Service(Service {
                        r#type: ServiceType::VolumeAccessibilityConstraints as i32,
                    })),
                },
            ],
        }))
    }

    async fn probe(
        &self,
        _request: Request<csi::ProbeRequest>,
    ) -> Result<Response<csi::ProbeResponse>, Status> {
        Ok(Response::new(csi::ProbeResponse {
            ready: Some(self.readiness.is_ready()),
        }))
    }
}
