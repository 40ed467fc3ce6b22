//! The core agent library: the Registry/Node sync engine (§4.1/§4.2), the
//! Volume Manager (§4.3), the WorkQueue primitive (§4.7) they both use, and
//! the [`CoreGrpc`](grpc::operations::core_grpc_server::CoreGrpc) server
//! that fronts them for the CSI controller and CRD reconcilers.

pub mod bus;
pub mod event_stream;
pub mod grpc_service;
pub mod node;
pub mod registry;
pub mod volume;
pub mod workqueue;
