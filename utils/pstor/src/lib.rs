//! Persistent store adapter (spec §4.6).
//!
//! Only nexus recovery info is persisted -- Node, Pool, Replica, Nexus and
//! Volume state live in process memory and are rebuilt from the data-plane on
//! sync (spec §3). The store itself is etcd-backed, reached through a
//! [`Store`] trait so the nexus-info operations can be exercised against an
//! in-memory fake in tests.

mod etcd;
mod mem;
mod nexus_info;

pub use etcd::EtcdStore;
pub use mem::MemStore;
pub use nexus_info::{destroy_nexus, filter_replicas, get_nexus_info, put_nexus_info};

use async_trait::async_trait;
use snafu::Snafu;

/// Calls that exceed this deadline fail, and the etcd client is dropped and
/// reconnected on the next call rather than reused (spec §4.6).
pub const STORE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum StoreError {
    #[snafu(display("persistent store call timed out after {0:?}", STORE_DEADLINE))]
    Timeout,
    #[snafu(display("persistent store connection error: {source}"))]
    Connect { source: etcd_client::Error },
    #[snafu(display("persistent store request failed: {source}"))]
    Request { source: etcd_client::Error },
    #[snafu(display("failed to (de)serialise stored value: {source}"))]
    Serde { source: serde_json::Error },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A minimal async key-value store abstraction over the persistent backend.
///
/// Keys and values are opaque bytes; callers (see [`nexus_info`]) own the
/// JSON encoding of the values they persist.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
