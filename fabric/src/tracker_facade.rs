//! The Tracker facade (spec §4.F), a thin wrapper over
//! `fabric_tracker::router::TrackerSupervisor` in the same style as
//! [`crate::pubsub::PubSub`] over `Adapter`/`Registry`.

use std::sync::Arc;

use bytes::Bytes;
use fabric_core::error::FabricError;
use fabric_core::topic::Topic;
use fabric_core::transport::{ClusterTransport, NodeName};
use fabric_tracker::handler::TrackerHandler;
use fabric_tracker::owner::{HandleId, TrackedOwner};
use fabric_tracker::router::TrackerSupervisor;
use fabric_tracker::shard::TrackerConfig;
use fabric_tracker::wire::{PresenceEntry, TrackerMessage};

use crate::config::Options;

/// A presence-tracking instance: `options.tracker_pool_size` CRDT shards
/// replicating `(topic, key, metadata)` entries across the cluster.
pub struct Tracker<H: TrackerHandler> {
    inner: TrackerSupervisor<H::Meta>,
}

impl<H: TrackerHandler> Tracker<H> {
    /// Starts `options.tracker_pool_size` shard workers under
    /// `options.name`, using `options.broadcast_period`/`permdown_period`
    /// for the gossip protocol.
    pub fn start(
        options: Options,
        transport: Arc<dyn ClusterTransport<TrackerMessage<H::Meta>>>,
        handler: Arc<H>,
    ) -> Result<Self, FabricError> {
        options.validate()?;
        let config = TrackerConfig {
            broadcast_period: options.broadcast_period,
            permdown_period: options.permdown_period,
            ..TrackerConfig::default()
        };
        let inner = TrackerSupervisor::start(
            &options.name,
            options.tracker_pool_size,
            config,
            transport,
            handler,
        )?;
        Ok(Self { inner })
    }

    /// Tracks `(topic, key)` with `metadata`, monitoring `owner` so its
    /// involuntary death triggers an automatic `untrack`.
    pub async fn track(
        &self,
        topic: Topic,
        key: Bytes,
        metadata: H::Meta,
        owner: Arc<dyn TrackedOwner>,
    ) -> Result<(), FabricError> {
        self.inner.track(topic, key, metadata, owner).await
    }

    /// Removes a single `(topic, key)` entry owned by this node.
    pub async fn untrack(&self, topic: Topic, key: Bytes) -> Result<(), FabricError> {
        self.inner.untrack(topic, key).await
    }

    /// Removes every entry registered by `owner`, across every shard.
    pub async fn untrack_all(&self, owner: HandleId) {
        self.inner.untrack_all(owner).await;
    }

    /// Replaces a tracked entry's metadata via `update`, re-emitted as a
    /// remove+add pair with a fresh clock.
    pub async fn update(
        &self,
        topic: Topic,
        key: Bytes,
        update: Box<dyn FnOnce(Option<&H::Meta>) -> H::Meta + Send>,
    ) -> Result<(), FabricError> {
        self.inner.update(topic, key, update).await
    }

    /// Every known `(key, metadata)` pair tracked under `topic`, local and
    /// replicated.
    pub async fn list(&self, topic: Topic) -> Vec<PresenceEntry<H::Meta>> {
        self.inner.list(topic).await
    }

    /// Every `(owning node, metadata)` pair tracked under `(topic, key)`.
    pub async fn get_by_key(&self, topic: Topic, key: Bytes) -> Vec<(NodeName, Arc<H::Meta>)> {
        self.inner.get_by_key(topic, key).await
    }

    /// Number of shard workers this tracker started.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.inner.shard_count()
    }
}
