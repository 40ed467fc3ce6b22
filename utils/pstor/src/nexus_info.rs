use crate::{Store, StoreResult};
use snafu::ResultExt;
use stor_port::types::v0::store::{NexusInfo, NexusInfoKey};
use stor_port::types::v0::transport::{NexusId, ReplicaId};

/// Fetch the recovery info persisted for a nexus, if any has ever been
/// written for it.
pub async fn get_nexus_info(store: &dyn Store, nexus: &NexusId) -> StoreResult<Option<NexusInfo>> {
    let key = NexusInfoKey::new(nexus).key();
    let Some(bytes) = store.get(&key).await? else {
        return Ok(None);
    };
    let info = serde_json::from_slice(&bytes).context(crate::Serde)?;
    Ok(Some(info))
}

/// Persist the recovery info for a nexus, overwriting whatever was there.
pub async fn put_nexus_info(store: &dyn Store, nexus: &NexusId, info: &NexusInfo) -> StoreResult<()> {
    let key = NexusInfoKey::new(nexus).key();
    let bytes = serde_json::to_vec(info).context(crate::Serde)?;
    store.put(&key, bytes).await
}

/// Remove the recovery info for a nexus that no longer exists.
pub async fn destroy_nexus(store: &dyn Store, nexus: &NexusId) -> StoreResult<()> {
    let key = NexusInfoKey::new(nexus).key();
    store.delete(&key).await
}

/// Narrow a candidate replica list down to those the last recorded nexus
/// shutdown considered healthy.
///
/// If the nexus shut down cleanly, or no recovery info was ever persisted
/// for it (a brand-new nexus), every candidate is returned unfiltered: there
/// is nothing to recover from. Otherwise only replicas the persisted record
/// marks healthy survive -- an unhealthy or unlisted replica was out of sync
/// at the time of the unclean shutdown and must not be used to rebuild. And
/// if the shutdown was unclean and more than one healthy replica survives,
/// only one may rejoin the nexus (§4.6) -- `local` names the candidate
/// sharing the nexus' own node, if any, which is preferred; otherwise the
/// first surviving candidate is kept.
pub async fn filter_replicas(
    store: &dyn Store,
    nexus: &NexusId,
    candidates: &[ReplicaId],
    local: Option<ReplicaId>,
) -> StoreResult<Vec<ReplicaId>> {
    let Some(info) = get_nexus_info(store, nexus).await? else {
        return Ok(candidates.to_vec());
    };
    if info.clean_shutdown {
        return Ok(candidates.to_vec());
    }
    let healthy: std::collections::HashSet<_> = info
        .children
        .iter()
        .filter(|child| child.healthy)
        .map(|child| child.uuid)
        .collect();
    let surviving: Vec<ReplicaId> = candidates
        .iter()
        .filter(|id| healthy.contains(id))
        .copied()
        .collect();
    if surviving.len() <= 1 {
        return Ok(surviving);
    }
    let keep = local
        .filter(|id| surviving.contains(id))
        .unwrap_or(surviving[0]);
    Ok(vec![keep])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;
    use stor_port::types::v0::store::ChildInfo;

    fn replica() -> ReplicaId {
        ReplicaId::new()
    }

    #[tokio::test]
    async fn unknown_nexus_keeps_all_candidates() {
        let store = MemStore::new();
        let nexus = NexusId::new();
        let candidates = vec![replica(), replica()];
        let filtered = filter_replicas(&store, &nexus, &candidates, None).await.unwrap();
        assert_eq!(filtered, candidates);
    }

    #[tokio::test]
    async fn clean_shutdown_keeps_all_candidates() {
        let store = MemStore::new();
        let nexus = NexusId::new();
        let healthy = replica();
        let unhealthy = replica();
        let info = NexusInfo {
            clean_shutdown: true,
            children: vec![
                ChildInfo {
                    uuid: healthy,
                    healthy: true,
                },
                ChildInfo {
                    uuid: unhealthy,
                    healthy: false,
                },
            ],
        };
        put_nexus_info(&store, &nexus, &info).await.unwrap();
        let candidates = vec![healthy, unhealthy];
        let filtered = filter_replicas(&store, &nexus, &candidates, None).await.unwrap();
        assert_eq!(filtered, candidates);
    }

    #[tokio::test]
    async fn unclean_shutdown_drops_unhealthy_replicas() {
        let store = MemStore::new();
        let nexus = NexusId::new();
        let healthy = replica();
        let unhealthy = replica();
        let info = NexusInfo {
            clean_shutdown: false,
            children: vec![
                ChildInfo {
                    uuid: healthy,
                    healthy: true,
                },
                ChildInfo {
                    uuid: unhealthy,
                    healthy: false,
                },
            ],
        };
        put_nexus_info(&store, &nexus, &info).await.unwrap();
        let candidates = vec![healthy, unhealthy];
        let filtered = filter_replicas(&store, &nexus, &candidates, None).await.unwrap();
        assert_eq!(filtered, vec![healthy]);
    }

    #[tokio::test]
    async fn unclean_shutdown_with_two_healthy_keeps_only_the_local_one() {
        let store = MemStore::new();
        let nexus = NexusId::new();
        let local = replica();
        let remote = replica();
        let info = NexusInfo {
            clean_shutdown: false,
            children: vec![
                ChildInfo { uuid: local, healthy: true },
                ChildInfo { uuid: remote, healthy: true },
            ],
        };
        put_nexus_info(&store, &nexus, &info).await.unwrap();
        let candidates = vec![remote, local];
        let filtered = filter_replicas(&store, &nexus, &candidates, Some(local)).await.unwrap();
        assert_eq!(filtered, vec![local]);
    }

    #[tokio::test]
    async fn unclean_shutdown_with_two_healthy_and_no_local_keeps_the_first() {
        let store = MemStore::new();
        let nexus = NexusId::new();
        let first = replica();
        let second = replica();
        let info = NexusInfo {
            clean_shutdown: false,
            children: vec![
                ChildInfo { uuid: first, healthy: true },
                ChildInfo { uuid: second, healthy: true },
            ],
        };
        put_nexus_info(&store, &nexus, &info).await.unwrap();
        let candidates = vec![first, second];
        let filtered = filter_replicas(&store, &nexus, &candidates, None).await.unwrap();
        assert_eq!(filtered, vec![first]);
    }

    #[tokio::test]
    async fn destroy_nexus_removes_recovery_info() {
        let store = MemStore::new();
        let nexus = NexusId::new();
        let info = NexusInfo {
            clean_shutdown: true,
            children: vec![],
        };
        put_nexus_info(&store, &nexus, &info).await.unwrap();
        destroy_nexus(&store, &nexus).await.unwrap();
        assert!(get_nexus_info(&store, &nexus).await.unwrap().is_none());
    }
}
