//! Broadcast adapter and safe pool-size migration (spec §4.C, §4.H).
//!
//! Each `PubSub` instance owns one `Adapter`: a pool of named receiver
//! endpoints (`"{name}#0" .. "{name}#(pool_size-1)"`) that accept
//! [`Forward`] messages from peer nodes and hand them to the local
//! [`Registry`] for dispatch, plus a send path that fans a broadcast out
//! to every known peer.
//!
//! Each receiver endpoint runs on its own OS thread driving a small async
//! loop via `futures::executor::block_on` — the same one-thread-per-
//! worker shape the teacher crate uses for its hub and router event
//! loops, kept here even though the loop body itself needs nothing but
//! `recv_async`, so a future version that also watches a control channel
//! can grow into it without restructuring.
//!
//! Pool-size migration (spec §4.H): a node always *listens* on
//! `0..pool_size` endpoints but only ever *sends* on `0..broadcast_pool_size`
//! shards, and `broadcast_pool_size <= pool_size` is enforced at
//! construction. Growing a cluster's `pool_size` while leaving
//! `broadcast_pool_size` fixed is therefore always safe: new listeners
//! appear before anything is told to send to them.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;

use crate::dispatcher::{Dispatcher, DispatcherId};
use crate::error::FabricError;
use crate::registry::Registry;
use crate::topic::{shard_of, Topic};
use crate::transport::{ClusterTransport, NodeName, ProcessName};

/// The envelope shipped between nodes for a single broadcast.
#[derive(Debug, Clone)]
pub struct Forward<M> {
    pub topic: Topic,
    pub message: Arc<M>,
    pub dispatcher: DispatcherId,
    pub origin_node: NodeName,
}

/// A registered dispatcher table, keyed by the id named in a `Forward`.
/// Populated once at startup; a `Forward` naming an unregistered id is
/// logged and dropped rather than panicking the receiver worker.
pub type DispatcherTable<M, V> = DashMap<DispatcherId, Arc<dyn Dispatcher<M, V>>>;

/// The per-instance broadcast plane: owns the receiver worker pool and
/// the send-side fan-out logic.
pub struct Adapter<M, V = ()>
where
    M: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    name: Arc<str>,
    pool_size: usize,
    broadcast_pool_size: usize,
    transport: Arc<dyn ClusterTransport<Forward<M>>>,
}

impl<M, V> Adapter<M, V>
where
    M: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Builds an adapter and spawns its `pool_size` receiver workers.
    ///
    /// Fails with [`FabricError::ConfigInvalid`] if
    /// `broadcast_pool_size > pool_size`, or if either is zero.
    pub fn start(
        name: impl Into<Arc<str>>,
        pool_size: usize,
        broadcast_pool_size: usize,
        transport: Arc<dyn ClusterTransport<Forward<M>>>,
        registry: Arc<Registry<M, V>>,
        dispatchers: Arc<DispatcherTable<M, V>>,
    ) -> Result<Self, FabricError> {
        let name = name.into();
        if pool_size == 0 {
            return Err(FabricError::config_invalid("pool_size must be nonzero"));
        }
        if broadcast_pool_size == 0 || broadcast_pool_size > pool_size {
            return Err(FabricError::config_invalid(
                "broadcast_pool_size must be nonzero and <= pool_size",
            ));
        }

        for idx in 0..pool_size {
            let process = ProcessName::new(format!("{name}#{idx}"));
            let rx = transport.register(process);
            let registry = Arc::clone(&registry);
            let dispatchers = Arc::clone(&dispatchers);
            std::thread::Builder::new()
                .name(format!("fabric-adapter-{name}-{idx}"))
                .spawn(move || futures::executor::block_on(receiver_loop(rx, registry, dispatchers)))
                .expect("failed to spawn adapter receiver thread");
        }

        Ok(Self {
            name,
            pool_size,
            broadcast_pool_size,
            transport,
        })
    }

    /// This instance's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of receiver endpoints this adapter listens on.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of shards used when sending; always `<= pool_size`.
    #[must_use]
    pub fn broadcast_pool_size(&self) -> usize {
        self.broadcast_pool_size
    }

    /// This node's name, as reported by the transport.
    #[must_use]
    pub fn this_node(&self) -> NodeName {
        self.transport.this_node()
    }

    fn process_for(&self, topic: &[u8]) -> ProcessName {
        let idx = shard_of(topic, self.broadcast_pool_size);
        ProcessName::new(format!("{}#{idx}", self.name))
    }

    /// Fans `message` out to every peer the transport currently knows
    /// about. Fire-and-forget: a peer that is unreachable simply never
    /// receives it, and this call never fails for that reason — it only
    /// performs local bookkeeping, never waits for acknowledgement.
    ///
    /// Local delivery is the caller's responsibility (the `PubSub` facade
    /// dispatches to local subscribers itself before or after this call).
    pub async fn broadcast(&self, topic: Topic, message: Arc<M>, dispatcher: DispatcherId) {
        let process = self.process_for(&topic);
        let origin_node = self.transport.this_node();
        let peers = self.transport.list_peers();

        let sends = peers.into_iter().map(|peer| {
            let process = process.clone();
            let envelope = Forward {
                topic: topic.clone(),
                message: Arc::clone(&message),
                dispatcher,
                origin_node: origin_node.clone(),
            };
            async move { self.transport.send_async(peer, process, envelope).await }
        });
        join_all(sends).await;
    }

    /// Sends `message` to exactly one named peer, bypassing the rest of
    /// the cluster. Fails with [`FabricError::UnknownPeer`] if `target`
    /// is not among the transport's currently known peers.
    pub async fn direct_broadcast(
        &self,
        target: NodeName,
        topic: Topic,
        message: Arc<M>,
        dispatcher: DispatcherId,
    ) -> Result<(), FabricError> {
        if !self.transport.list_peers().contains(&target) {
            return Err(FabricError::UnknownPeer);
        }
        let process = self.process_for(&topic);
        let envelope = Forward {
            topic,
            message,
            dispatcher,
            origin_node: self.transport.this_node(),
        };
        self.transport.send_async(target, process, envelope).await;
        Ok(())
    }
}

async fn receiver_loop<M, V>(
    rx: flume::Receiver<Forward<M>>,
    registry: Arc<Registry<M, V>>,
    dispatchers: Arc<DispatcherTable<M, V>>,
) where
    M: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    while let Ok(forward) = rx.recv_async().await {
        match dispatchers.get(forward.dispatcher) {
            Some(dispatcher) => {
                // Remote-originated deliveries never exclude a sender
                // (spec Design Notes §9): the handle that produced this
                // message lives on a different node entirely.
                registry.dispatch(&forward.topic, None, forward.message, dispatcher.value().as_ref());
            }
            None => {
                tracing::warn!(
                    dispatcher = forward.dispatcher,
                    origin = %forward.origin_node,
                    "forward named an unregistered dispatcher, dropping"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{DefaultDispatcher, DEFAULT_DISPATCHER};
    use crate::handle::ChannelSubscriber;
    use crate::transport::NodeEvent;
    use async_trait::async_trait;
    use bytes::Bytes;
    use dashmap::DashMap as Map;

    /// A transport stub shared between simulated nodes: `mailboxes` is a
    /// single table keyed by `(node, process)`, so registering on "b" and
    /// sending from "a" round-trips without any real network.
    struct SharedTransport {
        this_node: NodeName,
        peers: Vec<NodeName>,
        mailboxes: Arc<Map<(NodeName, ProcessName), flume::Sender<Forward<u32>>>>,
    }

    impl SharedTransport {
        fn new(
            this_node: &str,
            peers: &[&str],
            mailboxes: Arc<Map<(NodeName, ProcessName), flume::Sender<Forward<u32>>>>,
        ) -> Self {
            Self {
                this_node: NodeName::new(this_node),
                peers: peers.iter().map(|p| NodeName::new(*p)).collect(),
                mailboxes,
            }
        }
    }

    #[async_trait]
    impl ClusterTransport<Forward<u32>> for SharedTransport {
        fn this_node(&self) -> NodeName {
            self.this_node.clone()
        }

        fn list_peers(&self) -> Vec<NodeName> {
            self.peers.clone()
        }

        async fn send_async(&self, peer: NodeName, process: ProcessName, msg: Forward<u32>) {
            if let Some(tx) = self.mailboxes.get(&(peer, process)) {
                let _ = tx.send(msg);
            }
        }

        fn monitor_nodes(&self) -> flume::Receiver<NodeEvent> {
            flume::bounded(1).1
        }

        fn register(&self, process: ProcessName) -> flume::Receiver<Forward<u32>> {
            let (tx, rx) = flume::unbounded();
            self.mailboxes.insert((self.this_node.clone(), process), tx);
            rx
        }
    }

    fn dispatchers() -> Arc<DispatcherTable<u32, ()>> {
        let table: DispatcherTable<u32, ()> = DashMap::new();
        table.insert(
            DEFAULT_DISPATCHER,
            Arc::new(DefaultDispatcher) as Arc<dyn Dispatcher<u32, ()>>,
        );
        Arc::new(table)
    }

    #[test]
    fn start_rejects_broadcast_pool_size_exceeding_pool_size() {
        let mailboxes = Arc::new(Map::new());
        let transport: Arc<dyn ClusterTransport<Forward<u32>>> =
            Arc::new(SharedTransport::new("a", &[], mailboxes));
        let registry = Arc::new(Registry::<u32, ()>::new(1));
        let err = Adapter::start("x", 2, 3, transport, registry, dispatchers()).unwrap_err();
        assert!(matches!(err, FabricError::ConfigInvalid(_)));
    }

    #[test]
    fn forward_delivers_to_local_subscriber_on_receiving_node() {
        let mailboxes = Arc::new(Map::new());

        let registry_b = Arc::new(Registry::<u32, ()>::new(1));
        let (sub, rx) = ChannelSubscriber::<u32>::bounded(4);
        registry_b
            .subscribe(Bytes::from_static(b"room"), Arc::new(sub), ())
            .unwrap();

        let transport_b: Arc<dyn ClusterTransport<Forward<u32>>> =
            Arc::new(SharedTransport::new("b", &["a"], Arc::clone(&mailboxes)));
        let _adapter_b = Adapter::start("chat", 1, 1, transport_b, Arc::clone(&registry_b), dispatchers())
            .unwrap();
        // `register` (called synchronously inside `start`) has already
        // installed the mailbox by the time this returns; no need to wait
        // for the receiver thread itself to reach `recv_async`, since the
        // channel buffers the send regardless of whether anyone is parked
        // on the other end yet.

        let transport_a = SharedTransport::new("a", &["b"], mailboxes);
        futures::executor::block_on(transport_a.send_async(
            NodeName::new("b"),
            ProcessName::new("chat#0"),
            Forward {
                topic: Bytes::from_static(b"room"),
                message: Arc::new(42),
                dispatcher: DEFAULT_DISPATCHER,
                origin_node: NodeName::new("a"),
            },
        ));

        let received = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(*received, 42);
    }
}
