//! In-memory cluster transport for single-process clusters and tests.
//!
//! Grounded on `fabric_core::inproc`'s global endpoint registry: the same
//! idea (a process-wide table of named mailboxes, reached without any
//! network), generalized from one shared process-wide table to a
//! `LocalCluster` object so tests can run several independent simulated
//! clusters side by side instead of fighting over one global.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fabric_core::transport::{ClusterTransport, NodeEvent, NodeName, ProcessName};
use parking_lot::Mutex;

struct NodeHandle<Msg> {
    processes: DashMap<ProcessName, flume::Sender<Msg>>,
    monitors: Mutex<Vec<flume::Sender<NodeEvent>>>,
}

impl<Msg> Default for NodeHandle<Msg> {
    fn default() -> Self {
        Self { processes: DashMap::new(), monitors: Mutex::new(Vec::new()) }
    }
}

/// A simulated cluster: a set of named "nodes" sharing one process,
/// reachable through [`LocalTransport`] handles rather than a real
/// network. `Msg` is fixed per cluster, matching how a real deployment
/// dedicates one transport per message type (pubsub forwards vs. tracker
/// gossip use independent transports even on the same physical cluster).
pub struct LocalCluster<Msg> {
    nodes: DashMap<NodeName, Arc<NodeHandle<Msg>>>,
}

impl<Msg: Send + 'static> LocalCluster<Msg> {
    /// Creates an empty cluster with no nodes joined yet.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { nodes: DashMap::new() })
    }

    /// Joins `node` to this cluster, announcing it as `Up` to every node
    /// already joined, and returns a transport handle for it.
    pub fn join(self: &Arc<Self>, node: impl Into<NodeName>) -> Arc<LocalTransport<Msg>> {
        let node = node.into();
        let handle = Arc::new(NodeHandle::default());
        for entry in &self.nodes {
            for tx in entry.value().monitors.lock().iter() {
                let _ = tx.send(NodeEvent::Up(node.clone()));
            }
        }
        self.nodes.insert(node.clone(), handle);
        Arc::new(LocalTransport { node, cluster: Arc::clone(self) })
    }

    /// Removes `node` from the cluster, announcing it as `Down` to every
    /// remaining node. Simulates a crash or partition for tests.
    pub fn evict(&self, node: &NodeName) {
        self.nodes.remove(node);
        for entry in &self.nodes {
            for tx in entry.value().monitors.lock().iter() {
                let _ = tx.send(NodeEvent::Down(node.clone()));
            }
        }
    }
}

/// One node's view of a [`LocalCluster`]: implements `ClusterTransport`
/// by looking up the target node's mailbox table directly, with no
/// serialization or network hop.
pub struct LocalTransport<Msg> {
    node: NodeName,
    cluster: Arc<LocalCluster<Msg>>,
}

#[async_trait]
impl<Msg: Send + 'static> ClusterTransport<Msg> for LocalTransport<Msg> {
    fn this_node(&self) -> NodeName {
        self.node.clone()
    }

    fn list_peers(&self) -> Vec<NodeName> {
        self.cluster
            .nodes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|n| *n != self.node)
            .collect()
    }

    async fn send_async(&self, peer: NodeName, process: ProcessName, msg: Msg) {
        if let Some(handle) = self.cluster.nodes.get(&peer) {
            if let Some(tx) = handle.processes.get(&process) {
                // Fire-and-forget: a full or disconnected mailbox just
                // drops the message, matching the at-most-once contract.
                let _ = tx.try_send(msg);
            }
        }
    }

    fn monitor_nodes(&self) -> flume::Receiver<NodeEvent> {
        let (tx, rx) = flume::unbounded();
        if let Some(handle) = self.cluster.nodes.get(&self.node) {
            handle.monitors.lock().push(tx);
        }
        rx
    }

    fn register(&self, process: ProcessName) -> flume::Receiver<Msg> {
        let (tx, rx) = flume::unbounded();
        if let Some(handle) = self.cluster.nodes.get(&self.node) {
            handle.processes.insert(process, tx);
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_async_delivers_to_registered_process_on_peer() {
        let cluster = LocalCluster::<u32>::new();
        let a = cluster.join("a");
        let b = cluster.join("b");

        let rx = b.register(ProcessName::new("echo#0"));
        futures::executor::block_on(a.send_async(NodeName::new("b"), ProcessName::new("echo#0"), 7));
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn send_async_to_unknown_process_is_silently_dropped() {
        let cluster = LocalCluster::<u32>::new();
        let a = cluster.join("a");
        let _b = cluster.join("b");

        futures::executor::block_on(a.send_async(NodeName::new("b"), ProcessName::new("nobody"), 7));
        // No panic, no observable effect: this is the test.
    }

    #[test]
    fn list_peers_excludes_self() {
        let cluster = LocalCluster::<u32>::new();
        let a = cluster.join("a");
        let _b = cluster.join("b");
        let _c = cluster.join("c");

        let peers = a.list_peers();
        assert_eq!(peers.len(), 2);
        assert!(!peers.contains(&NodeName::new("a")));
    }

    #[test]
    fn evict_announces_down_to_remaining_nodes() {
        let cluster = LocalCluster::<u32>::new();
        let a = cluster.join("a");
        let _b = cluster.join("b");
        let events = a.monitor_nodes();

        cluster.evict(&NodeName::new("b"));

        assert_eq!(events.try_recv().unwrap(), NodeEvent::Down(NodeName::new("b")));
    }

    #[test]
    fn join_announces_up_to_already_joined_nodes() {
        let cluster = LocalCluster::<u32>::new();
        let a = cluster.join("a");
        let events = a.monitor_nodes();

        let _b = cluster.join("b");

        assert_eq!(events.try_recv().unwrap(), NodeEvent::Up(NodeName::new("b")));
    }
}
