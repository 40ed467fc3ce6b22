use super::{
    ids::{NodeId, PoolId, ReplicaId},
    protocol::ReplicaProtocol,
};
use serde::{Deserialize, Serialize};

/// A fixed-size logical volume allocated from a Pool (spec §3 Replica).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaState {
    pub uuid: ReplicaId,
    pub pool: PoolId,
    pub node: NodeId,
    pub size: u64,
    pub share: ReplicaProtocol,
    pub uri: String,
    /// Set by the Node sync engine's offline cascade; not persisted.
    pub offline: bool,
}

impl ReplicaState {
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// The persistent-identity UUID parsed from the `uuid` query parameter
    /// of this replica's URI ("realUuid", spec §3).
    pub fn real_uuid(&self) -> Option<String> {
        parse_query_param(&self.uri, "uuid")
    }

    pub fn is_local(&self) -> bool {
        matches!(self.share, ReplicaProtocol::None)
    }
}

/// Parse a single query parameter out of a URI string without requiring a
/// full URI parsing dependency at this layer.
fn parse_query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_real_uuid_from_query() {
        let uri = "nvmf://10.0.0.5:4421/nqn.2019-05.io.openebs:nexus-0?uuid=abc-123";
        assert_eq!(parse_query_param(uri, "uuid"), Some("abc-123".to_string()));
    }

    #[test]
    fn missing_query_returns_none() {
        let uri = "bdev:///dev/null";
        assert_eq!(parse_query_param(uri, "uuid"), None);
    }
}
