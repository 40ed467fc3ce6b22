//! Idempotence cache for CSI Controller RPCs (§4.4): a duplicate
//! `CreateVolume`/`ControllerPublishVolume`/... call racing the first one
//! must not be allowed to run concurrently -- it waits for the first call's
//! result and returns that instead of re-running the request.
//!
//! One [`DedupCache<T>`] is kept per RPC method, since each method's
//! response type differs; the cache key is the caller's own
//! canonicalisation of the request (for `CreateVolume` that's the volume
//! name, for `ControllerPublishVolume` the `(volume_id, node_id)` pair).

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast;
use tonic::{Code, Status};

#[derive(Clone)]
pub(crate) enum Outcome<T> {
    Ok(T),
    Err(Code, String),
}

impl<T> Outcome<T> {
    fn into_result(self) -> Result<T, Status> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(code, message) => Err(Status::new(code, message)),
        }
    }
}

enum Entry<T> {
    InFlight(broadcast::Sender<Outcome<T>>),
    Done(Outcome<T>, Instant),
}

pub enum Lease<T> {
    /// No other call with this key is in flight or recently completed; the
    /// caller must run the request and report the outcome via [`Guard`].
    Leader(Guard<T>),
    /// Another call with this key is already running; wait for its result.
    Follower(broadcast::Receiver<Outcome<T>>),
    /// A recent call with this key already completed; replay its outcome.
    Cached(Result<T, Status>),
}

pub struct Guard<T> {
    cache: DedupCache<T>,
    key: String,
}

impl<T: Clone + Send + Sync + 'static> Guard<T> {
    pub fn complete(self, result: &Result<T, Status>) {
        let outcome = match result {
            Ok(value) => Outcome::Ok(value.clone()),
            Err(status) => Outcome::Err(status.code(), status.message().to_string()),
        };
        let mut entries = self.cache.entries.lock();
        if let Some(Entry::InFlight(tx)) = entries.remove(&self.key) {
            tx.send(outcome.clone()).ok();
        }
        entries.insert(self.key, Entry::Done(outcome, Instant::now()));
    }
}

/// Keyed by a caller-supplied canonical request key.
pub struct DedupCache<T> {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
}

impl<T> Clone for DedupCache<T> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            entries: self.entries.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> DedupCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn acquire(&self, key: impl Into<String>) -> Lease<T> {
        let key = key.into();
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(Entry::InFlight(tx)) => Lease::Follower(tx.subscribe()),
            Some(Entry::Done(outcome, at)) if at.elapsed() < self.ttl => {
                Lease::Cached(outcome.clone().into_result())
            }
            _ => {
                let (tx, _rx) = broadcast::channel(1);
                entries.insert(key.clone(), Entry::InFlight(tx));
                Lease::Leader(Guard {
                    cache: self.clone(),
                    key,
                })
            }
        }
    }
}

/// Wait on a follower receiver for the leader's outcome.
pub async fn await_outcome<T>(mut rx: broadcast::Receiver<Outcome<T>>) -> Result<T, Status> {
    match rx.recv().await {
        Ok(outcome) => outcome.into_result(),
        Err(_) => Err(Status::aborted(
            "the in-flight request this call deduplicated against was dropped",
        )),
    }
}
