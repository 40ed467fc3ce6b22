//! CSI controller plugin: Identity and Controller services only (§4.4).
//! The CSI Node plugin (host mount/stage handling) is out of scope here.

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod config;
pub mod controller;
pub mod dedup;
pub mod identity;
pub mod topology;
pub mod workqueue;
