//! Per-instance metadata (spec §3 data model).
//!
//! Registered once at startup and never mutated thereafter — safe to
//! share freely once published. Modeled as a write-once record in a
//! global registry keyed by instance name, the same pattern the teacher
//! crate uses for its process-wide `inproc://` endpoint table.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::transport::NodeName;

/// Immutable per-`PubSub`-instance metadata, published at startup.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    /// The instance's name, unique per node.
    pub name: Arc<str>,
    /// This node's name, as reported by the transport.
    pub node_name: NodeName,
    /// Number of adapter receive shards.
    pub pool_size: usize,
    /// Number of adapter shards used when sending (`<= pool_size`).
    pub broadcast_pool_size: usize,
    /// Number of local registry shards.
    pub registry_size: usize,
}

static METADATA: Lazy<DashMap<Arc<str>, Arc<InstanceMetadata>>> = Lazy::new(DashMap::new);

/// Publishes `metadata` under its own name. Called once per instance at
/// startup; later calls for the same name overwrite the prior record
/// (used by tests that rebuild an instance under the same name).
pub fn publish(metadata: InstanceMetadata) -> Arc<InstanceMetadata> {
    let metadata = Arc::new(metadata);
    METADATA.insert(Arc::clone(&metadata.name), Arc::clone(&metadata));
    metadata
}

/// Looks up a previously published instance's metadata.
#[must_use]
pub fn lookup(name: &str) -> Option<Arc<InstanceMetadata>> {
    METADATA.get(name).map(|entry| Arc::clone(entry.value()))
}

/// Removes a published instance's metadata (shutdown).
pub fn unpublish(name: &str) {
    METADATA.remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_lookup_roundtrips() {
        let name: Arc<str> = Arc::from("test-instance-publish");
        publish(InstanceMetadata {
            name: Arc::clone(&name),
            node_name: NodeName::new("node-a"),
            pool_size: 4,
            broadcast_pool_size: 4,
            registry_size: 4,
        });

        let found = lookup(&name).unwrap();
        assert_eq!(found.pool_size, 4);
        assert_eq!(found.node_name.as_str(), "node-a");

        unpublish(&name);
        assert!(lookup(&name).is_none());
    }
}
