//! gRPC clients shared by the control-plane binaries.
//!
//! [`node_client`] wraps the generated node-daemon bindings ([`rpc`]) with
//! the soft-deadline call pattern the Node sync engine relies on (§4.1).
//! [`operations`] is this workspace's own service, used by the CSI
//! controller and CRD reconcilers to reach the core agent's Registry and
//! Volume Manager, in place of the HTTP surface a deployment with a REST
//! gateway would use.

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod operations {
    tonic::include_proto!("operations.v1");
}

pub mod convert;
pub mod core_client;
pub mod node_client;
