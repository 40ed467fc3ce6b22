//! Topology mapping between CSI `TopologyRequirement`s and node names (§4.4,
//! §6). The only topology key understood is `hostname`; it is expected to
//! carry the control plane's node name, not the Kubernetes node name.

use crate::csi;
use stor_port::transport_api::{InvalidArguments, SvcError};

pub const TOPOLOGY_KEY_HOSTNAME: &str = "openebs.io/nodename";

/// Required and preferred node names derived from a `CreateVolumeRequest`'s
/// `accessibility_requirements`.
#[derive(Debug, Default, Clone)]
pub struct NodeTopology {
    pub required: Vec<String>,
    pub preferred: Vec<String>,
}

/// `requisite` entries name nodes the volume *must* be placeable on;
/// unknown topology keys there are a caller error, since a requisite
/// constraint silently ignored would defeat its purpose. `preferred`
/// entries are a ranking hint only, so unknown keys there are dropped.
pub fn node_topology(requirement: &Option<csi::TopologyRequirement>) -> Result<NodeTopology, SvcError> {
    let Some(requirement) = requirement else {
        return Ok(NodeTopology::default());
    };

    let mut required = Vec::new();
    for topology in &requirement.requisite {
        match topology.segments.get(TOPOLOGY_KEY_HOSTNAME) {
            Some(node) => required.push(node.clone()),
            None => {
                let unknown = topology
                    .segments
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_default();
                return InvalidArguments {
                    details: format!("unsupported requisite topology key '{unknown}'"),
                }
                .fail();
            }
        }
    }

    let preferred = requirement
        .preferred
        .iter()
        .filter_map(|topology| topology.segments.get(TOPOLOGY_KEY_HOSTNAME).cloned())
        .collect();

    Ok(NodeTopology { required, preferred })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn topology(key: &str, value: &str) -> csi::Topology {
        csi::Topology {
            segments: HashMap::from([(key.to_string(), value.to_string())]),
        }
    }

    #[test]
    fn no_requirement_is_unconstrained() {
        let out = node_topology(&None).unwrap();
        assert!(out.required.is_empty());
        assert!(out.preferred.is_empty());
    }

    #[test]
    fn unknown_requisite_key_is_invalid_argument() {
        let requirement = csi::TopologyRequirement {
            requisite: vec![topology("unknown.io/zone", "z1")],
            preferred: vec![],
        };
        let err = node_topology(&Some(requirement)).unwrap_err();
        assert!(matches!(err, SvcError::InvalidArguments { .. }));
    }

    #[test]
    fn unknown_preferred_key_is_dropped_not_rejected() {
        let requirement = csi::TopologyRequirement {
            requisite: vec![],
            preferred: vec![topology("unknown.io/zone", "z1")],
        };
        let out = node_topology(&Some(requirement)).unwrap();
        assert!(out.preferred.is_empty());
    }

    #[test]
    fn hostname_requisite_is_required_node() {
        let requirement = csi::TopologyRequirement {
            requisite: vec![topology(TOPOLOGY_KEY_HOSTNAME, "node-1")],
            preferred: vec![topology(TOPOLOGY_KEY_HOSTNAME, "node-2")],
        };
        let out = node_topology(&Some(requirement)).unwrap();
        assert_eq!(out.required, vec!["node-1".to_string()]);
        assert_eq!(out.preferred, vec!["node-2".to_string()]);
    }
}
