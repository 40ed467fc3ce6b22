//! The `SvcError` taxonomy (spec §7) and the helpers used to carry it across
//! the RPC, CSI and CRD boundaries.

use snafu::Snafu;
use std::fmt::Write as _;

/// The kind of resource an error refers to, used purely for log/message
/// context (mirrors the teacher's `ResourceKind`).
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub enum ResourceKind {
    Node,
    Pool,
    Replica,
    Nexus,
    Volume,
}

/// A node-RPC status code, as returned by the data-plane daemon (spec §4.1).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RpcStatusCode {
    Ok,
    Cancelled,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    ResourceExhausted,
    FailedPrecondition,
    DeadlineExceeded,
    Internal,
    Unavailable,
    Unimplemented,
}

/// The error taxonomy shared by every component (spec §7). Every variant
/// maps to exactly one of the named taxonomy members via [`SvcError::code`].
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SvcError {
    #[snafu(display("{kind} '{id}' not found"))]
    NotFound { kind: ResourceKind, id: String },
    #[snafu(display("Node '{node}' not found"))]
    NodeNotFound { node: String },
    #[snafu(display("Pool '{pool}' not found on node '{node}'"))]
    PoolNotFound { node: String, pool: String },
    #[snafu(display("Replica '{uuid}' not found"))]
    ReplicaNotFound { uuid: String },
    #[snafu(display("Nexus '{uuid}' not found"))]
    NexusNotFound { uuid: String },
    #[snafu(display("Volume '{uuid}' not found"))]
    VolumeNotFound { uuid: String },

    #[snafu(display("{kind} '{id}' already exists"))]
    AlreadyExists { kind: ResourceKind, id: String },

    #[snafu(display("Invalid argument: {details}"))]
    InvalidArguments { details: String },

    #[snafu(display(
        "Not enough suitable pools: needed {requested_replicas} replicas, found {found_pools}"
    ))]
    ResourceExhausted {
        requested_replicas: u8,
        found_pools: usize,
    },

    #[snafu(display("Operation not permitted in current state: {details}"))]
    FailedPrecondition { details: String },

    #[snafu(display("Deadline exceeded calling '{method}' on '{endpoint}'"))]
    DeadlineExceeded { method: String, endpoint: String },

    #[snafu(display("Node '{node}' is unreachable"))]
    NodeNotOnline { node: String },
    #[snafu(display("Service is not ready to accept requests"))]
    Unavailable,

    #[snafu(display("Internal error: {details}"))]
    Internal { details: String },

    #[snafu(display("{operation} is not implemented"))]
    Unimplemented { operation: String },

    #[snafu(display("Resource '{kind}' '{id}' is busy"))]
    Conflict { kind: ResourceKind, id: String },

    #[snafu(display("Persistent store error: {details}"))]
    Store { details: String },
}

impl SvcError {
    /// Map this error to the taxonomy member named in spec §7.
    pub fn code(&self) -> RpcStatusCode {
        match self {
            SvcError::NotFound { .. }
            | SvcError::NodeNotFound { .. }
            | SvcError::PoolNotFound { .. }
            | SvcError::ReplicaNotFound { .. }
            | SvcError::NexusNotFound { .. }
            | SvcError::VolumeNotFound { .. } => RpcStatusCode::NotFound,
            SvcError::AlreadyExists { .. } => RpcStatusCode::AlreadyExists,
            SvcError::InvalidArguments { .. } => RpcStatusCode::InvalidArgument,
            SvcError::ResourceExhausted { .. } => RpcStatusCode::ResourceExhausted,
            SvcError::FailedPrecondition { .. } => RpcStatusCode::FailedPrecondition,
            SvcError::DeadlineExceeded { .. } => RpcStatusCode::DeadlineExceeded,
            SvcError::NodeNotOnline { .. } | SvcError::Unavailable => RpcStatusCode::Unavailable,
            SvcError::Internal { .. } | SvcError::Store { .. } => RpcStatusCode::Internal,
            SvcError::Unimplemented { .. } => RpcStatusCode::Unimplemented,
            SvcError::Conflict { .. } => RpcStatusCode::Cancelled,
        }
    }

    /// Map this error to a `tonic::Code` for the CSI gRPC surface (spec §4.4/§7).
    pub fn tonic_code(&self) -> tonic::Code {
        match self.code() {
            RpcStatusCode::Ok => tonic::Code::Ok,
            RpcStatusCode::Cancelled => tonic::Code::Aborted,
            RpcStatusCode::NotFound => tonic::Code::NotFound,
            RpcStatusCode::AlreadyExists => tonic::Code::AlreadyExists,
            RpcStatusCode::InvalidArgument => tonic::Code::InvalidArgument,
            RpcStatusCode::ResourceExhausted => tonic::Code::ResourceExhausted,
            RpcStatusCode::FailedPrecondition => tonic::Code::FailedPrecondition,
            RpcStatusCode::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            RpcStatusCode::Internal => tonic::Code::Internal,
            RpcStatusCode::Unavailable => tonic::Code::Unavailable,
            RpcStatusCode::Unimplemented => tonic::Code::Unimplemented,
        }
    }
}

impl From<SvcError> for tonic::Status {
    fn from(error: SvcError) -> Self {
        tonic::Status::new(error.tonic_code(), error.to_string())
    }
}

/// Renders the full `source()` chain of an error, teacher-style, for log
/// messages that need more than the top-level `Display`.
pub trait ErrorChain {
    fn full_string(&self) -> String;
}

impl<E: std::error::Error> ErrorChain for E {
    fn full_string(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            let _ = write!(out, ": {err}");
            source = err.source();
        }
        out
    }
}
