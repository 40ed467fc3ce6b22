//! The `v0/registry` message-bus topic adapter (§6). The transport itself is
//! opaque (assumed best-effort pub/sub, per spec.md's own framing) -- this
//! module only owns envelope parsing and dispatch into the [`Registry`], so
//! whatever pub/sub client a deployment wires up just needs to hand this the
//! raw payload bytes it received on `v0/registry`.

use crate::registry::Registry;
use serde::Deserialize;
use stor_port::types::v0::transport::NodeId;

#[derive(Debug, Deserialize)]
#[serde(tag = "id", content = "data", rename_all = "camelCase")]
enum RegistryMessage {
    #[serde(rename = "v0/register")]
    Register { id: String, grpc_endpoint: Option<String> },
    #[serde(rename = "v0/deregister")]
    Deregister { id: String },
}

/// Parse a single `v0/registry` payload and apply it to `registry`.
/// Malformed payloads are logged and discarded, matching §6 exactly.
pub fn handle_registry_message(registry: &Registry, payload: &[u8]) {
    let message: RegistryMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "discarding malformed v0/registry payload");
            return;
        }
    };
    match message {
        RegistryMessage::Register { id, grpc_endpoint } => {
            let Some(grpc_endpoint) = grpc_endpoint else {
                tracing::warn!(%id, "discarding v0/register with no grpcEndpoint");
                return;
            };
            registry.register_node(NodeId::from(id.as_str()), grpc_endpoint);
        }
        RegistryMessage::Deregister { id } => {
            registry.remove_node(&NodeId::from(id.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SyncConfig;
    use std::time::Duration;

    fn registry() -> Registry {
        Registry::new(SyncConfig {
            sync_period: Duration::from_secs(60),
            sync_retry: Duration::from_secs(60),
            bad_limit: 2,
            rpc_deadline: Duration::from_secs(1),
        })
    }

    #[test]
    fn register_adds_the_node() {
        let registry = registry();
        let payload = br#"{"id":"v0/register","data":{"id":"n1","grpcEndpoint":"http://10.0.0.1:10124"}}"#;
        handle_registry_message(&registry, payload);
        assert!(registry.node_state(&NodeId::from("n1")).is_some());
    }

    #[test]
    fn deregister_removes_the_node() {
        let registry = registry();
        handle_registry_message(
            &registry,
            br#"{"id":"v0/register","data":{"id":"n1","grpcEndpoint":"http://10.0.0.1:10124"}}"#,
        );
        handle_registry_message(&registry, br#"{"id":"v0/deregister","data":{"id":"n1"}}"#);
        assert!(registry.node_state(&NodeId::from("n1")).is_none());
    }

    #[test]
    fn malformed_payload_is_discarded_not_panicking() {
        let registry = registry();
        handle_registry_message(&registry, b"not json at all");
        handle_registry_message(&registry, br#"{"id":"v0/register","data":{}}"#);
        assert!(registry.nodes().is_empty());
    }

    #[test]
    fn register_without_endpoint_is_discarded() {
        let registry = registry();
        handle_registry_message(&registry, br#"{"id":"v0/register","data":{"id":"n1"}}"#);
        assert!(registry.node_state(&NodeId::from("n1")).is_none());
    }
}
