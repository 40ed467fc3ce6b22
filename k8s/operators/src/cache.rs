//! Generic resource cache (§4.5): list-then-watch snapshot of a CRD kind,
//! with optimistic-concurrency mutation helpers for the reconcilers.

use futures::StreamExt;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    runtime::watcher,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// An add/modify/delete notification replayed from the watch stream.
#[derive(Debug, Clone)]
pub enum CacheEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

/// Snapshot + live watch of one CRD kind, shared between the cache's own
/// watch task and the reconciler that consumes [`CacheEvent`]s from it.
pub struct ResourceCache<K> {
    api: Api<K>,
    snapshot: Arc<RwLock<HashMap<String, K>>>,
}

impl<K> Clone for ResourceCache<K> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<K> ResourceCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    /// Spawns the list-then-watch task and returns the cache handle plus
    /// the channel of events the task will keep producing.
    pub fn spawn(api: Api<K>, idle_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<CacheEvent<K>>) {
        let snapshot = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = Self { api: api.clone(), snapshot: snapshot.clone() };
        tokio::spawn(run_watch(api, snapshot, tx, idle_timeout));
        (cache, rx)
    }

    pub async fn get(&self, name: &str) -> Option<K> {
        self.snapshot.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<K> {
        self.snapshot.read().await.values().cloned().collect()
    }

    pub async fn create(&self, obj: &K) -> kube::Result<K> {
        self.api.create(&PostParams::default(), obj).await
    }

    pub async fn delete(&self, name: &str) -> kube::Result<()> {
        match self.api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Refetches `name`, applies `transform` to its spec/metadata, and
    /// retries on a 409 conflict (§4.5 optimistic concurrency).
    pub async fn update<F>(&self, name: &str, mut transform: F) -> kube::Result<K>
    where
        F: FnMut(&mut K) + Send,
    {
        loop {
            let mut current = self.api.get(name).await?;
            transform(&mut current);
            match self.api.replace(name, &PostParams::default(), &current).await {
                Ok(updated) => return Ok(updated),
                Err(kube::Error::Api(e)) if e.code == 409 => continue,
                Err(error) => return Err(error),
            }
        }
    }

    /// Same as [`Self::update`] but applies a JSON merge-patch against the
    /// `status` subresource only.
    pub async fn update_status<F>(&self, name: &str, mut transform: F) -> kube::Result<K>
    where
        F: FnMut(&mut K) + Send,
    {
        loop {
            let mut current = self.api.get_status(name).await?;
            let before = serde_json::to_value(&current).ok();
            transform(&mut current);
            if serde_json::to_value(&current).ok() == before {
                return Ok(current);
            }
            let patch = Patch::Merge(serde_json::json!({ "status": current }));
            match self.api.patch_status(name, &PatchParams::default(), &patch).await {
                Ok(updated) => return Ok(updated),
                Err(kube::Error::Api(e)) if e.code == 409 => continue,
                Err(error) => return Err(error),
            }
        }
    }
}

fn key<K: ResourceExt>(obj: &K) -> String {
    obj.name_any()
}

/// Cheap-first change detection: a differing generation is conclusive, a
/// matching one falls back to a full structural compare (status-only
/// updates don't bump `generation`).
fn changed<K: Resource<DynamicType = ()> + Serialize>(old: &K, new: &K) -> bool {
    if let (Some(a), Some(b)) = (old.meta().generation, new.meta().generation) {
        if a != b {
            return true;
        }
    }
    serde_json::to_value(old).ok() != serde_json::to_value(new).ok()
}

async fn run_watch<K>(
    api: Api<K>,
    snapshot: Arc<RwLock<HashMap<String, K>>>,
    tx: mpsc::UnboundedSender<CacheEvent<K>>,
    idle_timeout: Duration,
) where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    loop {
        let mut stream = Box::pin(watcher(api.clone(), watcher::Config::default()));
        loop {
            let next = tokio::time::timeout(idle_timeout, stream.next()).await;
            let event = match next {
                Err(_) => {
                    warn!(?idle_timeout, "no watch activity, restarting watch");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(error))) => {
                    warn!(%error, "watch stream error, restarting");
                    break;
                }
                Ok(Some(Ok(event))) => event,
            };
            match event {
                watcher::Event::Applied(obj) => apply(&snapshot, &tx, obj).await,
                watcher::Event::Deleted(obj) => {
                    snapshot.write().await.remove(&key(&obj));
                    let _ = tx.send(CacheEvent::Deleted(obj));
                }
                watcher::Event::Restarted(objs) => {
                    let fresh: HashMap<_, _> = objs.iter().map(|o| (key(o), o.clone())).collect();
                    let vanished: Vec<_> = {
                        let snap = snapshot.read().await;
                        snap.keys().filter(|k| !fresh.contains_key(*k)).cloned().collect()
                    };
                    for k in vanished {
                        if let Some(obj) = snapshot.write().await.remove(&k) {
                            let _ = tx.send(CacheEvent::Deleted(obj));
                        }
                    }
                    for obj in objs {
                        apply(&snapshot, &tx, obj).await;
                    }
                }
            }
        }
        // exponential backoff with a 30s cap is provided by `watcher`
        // itself; this loop only runs again on stream termination.
    }
}

async fn apply<K>(snapshot: &RwLock<HashMap<String, K>>, tx: &mpsc::UnboundedSender<CacheEvent<K>>, obj: K)
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize,
{
    let k = key(&obj);
    let mut snap = snapshot.write().await;
    match snap.insert(k, obj.clone()) {
        Some(previous) if !changed(&previous, &obj) => {}
        Some(_) => {
            let _ = tx.send(CacheEvent::Modified(obj));
        }
        None => {
            let _ = tx.send(CacheEvent::Added(obj));
        }
    }
}
