//! Generated gRPC bindings for the storage-node data-plane daemon.
//!
//! The `.proto` describes the minimal Pool/Replica/Nexus surface that the
//! control-plane's Node sync engine and RPC client depend on; see
//! `control-plane/grpc` for the soft-deadline client wrapper built on top.

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod node {
    pub mod v1 {
        tonic::include_proto!("mayadata.node.v1");
    }
}
