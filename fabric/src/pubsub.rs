//! The PubSub facade (spec §4.D).
//!
//! Thin wrapper over an `Adapter` plus a `Registry`, mirroring the
//! teacher crate's socket facades (`PubSocket` delegating to an
//! `InternalPub`): this type holds no logic of its own beyond wiring
//! cross-node fan-out to local dispatch in the order the spec requires.

use std::sync::Arc;

use fabric_core::adapter::{Adapter, DispatcherTable, Forward};
use fabric_core::dispatcher::{Dispatcher, DispatcherId, DefaultDispatcher, DEFAULT_DISPATCHER};
use fabric_core::error::{BroadcastError, FabricError};
use fabric_core::handle::{HandleId, Subscriber};
use fabric_core::instance::{self, InstanceMetadata};
use fabric_core::registry::Registry;
use fabric_core::topic::Topic;
use fabric_core::transport::{ClusterTransport, NodeName};

use crate::config::Options;

/// A publish/subscribe instance: a local `Registry` plus the `Adapter`
/// that fans its broadcasts out across the cluster.
pub struct PubSub<M, V = ()>
where
    M: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    registry: Arc<Registry<M, V>>,
    adapter: Adapter<M, V>,
    dispatchers: Arc<DispatcherTable<M, V>>,
    metadata: Arc<InstanceMetadata>,
}

impl<M, V> PubSub<M, V>
where
    M: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Starts an instance under `options.name`, registering `pool_size`
    /// adapter receive endpoints on `transport` and publishing this
    /// instance's [`InstanceMetadata`] globally.
    pub fn start(
        options: Options,
        transport: Arc<dyn ClusterTransport<Forward<M>>>,
    ) -> Result<Self, FabricError> {
        options.validate()?;

        let registry = Arc::new(Registry::new(options.registry_size));
        let dispatchers: Arc<DispatcherTable<M, V>> = Arc::new(DispatcherTable::new());
        dispatchers.insert(DEFAULT_DISPATCHER, Arc::new(DefaultDispatcher) as Arc<dyn Dispatcher<M, V>>);

        let adapter = Adapter::start(
            options.name.clone(),
            options.pool_size,
            options.broadcast_pool_size,
            transport,
            Arc::clone(&registry),
            Arc::clone(&dispatchers),
        )?;

        let metadata = instance::publish(InstanceMetadata {
            name: Arc::from(options.name.as_str()),
            node_name: adapter.this_node(),
            pool_size: options.pool_size,
            broadcast_pool_size: options.broadcast_pool_size,
            registry_size: options.registry_size,
        });

        Ok(Self { registry, adapter, dispatchers, metadata })
    }

    /// This instance's published, write-once metadata.
    #[must_use]
    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    /// This node's name, as reported by the underlying transport.
    #[must_use]
    pub fn node_name(&self) -> NodeName {
        self.adapter.this_node()
    }

    /// Registers a custom dispatcher under `id`. Must be called with the
    /// same `id` on every node that might receive a `Forward` naming it
    /// (Design Notes §9).
    pub fn register_dispatcher(&self, id: DispatcherId, dispatcher: Arc<dyn Dispatcher<M, V>>) {
        self.dispatchers.insert(id, dispatcher);
    }

    /// Subscribes `handle` to `topic` with an attached `value`.
    pub fn subscribe(&self, topic: Topic, handle: Arc<dyn Subscriber<M>>, value: V) -> Result<(), FabricError> {
        self.registry.subscribe(topic, handle, value)
    }

    /// Removes every `(handle, topic)` subscription for `topic`, idempotently.
    pub fn unsubscribe(&self, topic: &[u8], handle: HandleId) {
        self.registry.unsubscribe(topic, handle);
    }

    fn local_dispatch(&self, topic: &Topic, sender: Option<HandleId>, message: &Arc<M>, dispatcher: DispatcherId) {
        match self.dispatchers.get(dispatcher) {
            Some(d) => self.registry.dispatch(topic, sender, Arc::clone(message), d.value().as_ref()),
            None => tracing::warn!(dispatcher, "unregistered dispatcher id, dropping local dispatch"),
        }
    }

    /// Fans `message` out to every peer node, then delivers it locally
    /// with no sender exclusion (cross-node broadcasts never filter by
    /// sender — spec §4.D).
    pub async fn broadcast(&self, topic: Topic, message: M, dispatcher: DispatcherId) -> Result<(), FabricError> {
        let message = Arc::new(message);
        self.adapter.broadcast(topic.clone(), Arc::clone(&message), dispatcher).await;
        self.local_dispatch(&topic, None, &message, dispatcher);
        Ok(())
    }

    /// As [`Self::broadcast`], but local dispatch excludes `from` (the
    /// default dispatcher skips that handle; remote nodes never filter,
    /// since their subscribers never equal a foreign handle id).
    pub async fn broadcast_from(
        &self,
        from: HandleId,
        topic: Topic,
        message: M,
        dispatcher: DispatcherId,
    ) -> Result<(), FabricError> {
        let message = Arc::new(message);
        self.adapter.broadcast(topic.clone(), Arc::clone(&message), dispatcher).await;
        self.local_dispatch(&topic, Some(from), &message, dispatcher);
        Ok(())
    }

    /// Delivers to local subscribers only; the cluster adapter is never
    /// invoked.
    pub fn local_broadcast(&self, topic: Topic, message: M, dispatcher: DispatcherId) {
        self.local_dispatch(&topic, None, &Arc::new(message), dispatcher);
    }

    /// As [`Self::local_broadcast`], excluding `from`.
    pub fn local_broadcast_from(&self, from: HandleId, topic: Topic, message: M, dispatcher: DispatcherId) {
        self.local_dispatch(&topic, Some(from), &Arc::new(message), dispatcher);
    }

    /// Fans `message` out to `target` only; no local dispatch (the caller
    /// must not use this to reach its own node's subscribers).
    pub async fn direct_broadcast(
        &self,
        target: NodeName,
        topic: Topic,
        message: M,
        dispatcher: DispatcherId,
    ) -> Result<(), FabricError> {
        self.adapter.direct_broadcast(target, topic, Arc::new(message), dispatcher).await
    }

    /// As [`Self::broadcast`], panicking with a [`BroadcastError`] instead
    /// of returning one (the spec's "raising variant").
    pub async fn broadcast_or_panic(&self, topic: Topic, message: M, dispatcher: DispatcherId) {
        if let Err(e) = self.broadcast(topic, message, dispatcher).await {
            panic!("{}", BroadcastError::from(e));
        }
    }

    /// As [`Self::broadcast_from`], panicking with a [`BroadcastError`].
    pub async fn broadcast_from_or_panic(&self, from: HandleId, topic: Topic, message: M, dispatcher: DispatcherId) {
        if let Err(e) = self.broadcast_from(from, topic, message, dispatcher).await {
            panic!("{}", BroadcastError::from(e));
        }
    }

    /// As [`Self::direct_broadcast`], panicking with a [`BroadcastError`].
    pub async fn direct_broadcast_or_panic(&self, target: NodeName, topic: Topic, message: M, dispatcher: DispatcherId) {
        if let Err(e) = self.direct_broadcast(target, topic, message, dispatcher).await {
            panic!("{}", BroadcastError::from(e));
        }
    }
}

impl<M, V> Drop for PubSub<M, V>
where
    M: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        instance::unpublish(&self.metadata.name);
    }
}
