//! The cluster transport abstraction (spec §4.A).
//!
//! Everything this crate knows about the network is expressed through
//! this trait: name peer nodes, deliver a message asynchronously to a
//! named process on a named peer, monitor peer liveness, enumerate
//! current peers. Concrete transports (a real cluster membership library,
//! or the in-memory `fabric::LocalTransport` used for single-process
//! clusters and tests) live outside this crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// A cluster node's name. Cheap to clone and compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(Arc<str>);

impl NodeName {
    /// Builds a node name from anything string-like.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Borrows the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The name of a receiver process registered on a node (e.g. one of an
/// adapter's `name#shard` endpoints, or a tracker shard's identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessName(Arc<str>);

impl ProcessName {
    /// Builds a process name from anything string-like.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Borrows the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProcessName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A peer liveness event, as observed by `monitor_nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A peer became reachable.
    Up(NodeName),
    /// A peer is no longer reachable.
    Down(NodeName),
}

/// Abstract cluster transport: name peers, send fire-and-forget messages
/// to a named process on a named peer, and watch peer liveness.
///
/// `send_async` never raises: undeliverable messages are silently
/// dropped, matching the at-most-once, no-ack, no-cross-peer-ordering
/// contract from spec §4.A.
#[async_trait]
pub trait ClusterTransport<Msg>: Send + Sync
where
    Msg: Send + 'static,
{
    /// This process's own node name.
    fn this_node(&self) -> NodeName;

    /// Every peer node currently known to be up.
    fn list_peers(&self) -> Vec<NodeName>;

    /// Fire-and-forget delivery of `msg` to `process` on `peer`.
    async fn send_async(&self, peer: NodeName, process: ProcessName, msg: Msg);

    /// A channel of peer up/down events. Each call may return a fresh
    /// receiver backed by the same underlying event stream (i.e.
    /// implementations are expected to support multiple subscribers).
    fn monitor_nodes(&self) -> flume::Receiver<NodeEvent>;

    /// Binds an inbound mailbox for `process` on this node, returning the
    /// receiving end. Messages another node sends via `send_async` to
    /// this `(this_node(), process)` pair arrive here. Registering the
    /// same `process` twice replaces the previous mailbox.
    fn register(&self, process: ProcessName) -> flume::Receiver<Msg>;
}
