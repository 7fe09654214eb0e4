//! Tracker supervisor: owns a fixed pool of shard workers and routes every
//! public operation to the one responsible for its topic (spec §4.F).
//!
//! Thin by design — this layer holds no CRDT state itself, only the
//! routing table and the request/reply plumbing, mirroring how
//! `fabric_core::adapter::Adapter` stays a thin fan-out layer in front of
//! the registry it drives.

use std::sync::Arc;

use dashmap::DashMap;
use fabric_core::error::FabricError;
use fabric_core::topic::{shard_of, Topic};
use fabric_core::transport::{ClusterTransport, ProcessName};
use futures::future::join_all;

use crate::handler::TrackerHandler;
use crate::owner::{HandleId, TrackedOwner};
use crate::shard::{self, ShardCmd, ShardHandle, TrackerConfig};
use crate::wire::{PresenceEntry, TrackerMessage};

/// Supervises `shard_count` tracker shards and routes `track`/`untrack`/
/// `update`/`list`/`get_by_key` calls to the shard a topic hashes to.
/// `untrack_all` fans out to every shard, since an owner's entries may be
/// spread across more than one.
pub struct TrackerSupervisor<Meta> {
    shards: Vec<ShardHandle<Meta>>,
    /// Caches the last resolved shard index per topic to skip rehashing
    /// on hot paths; cleared entries just get recomputed, never wrong.
    topic_cache: DashMap<Topic, usize>,
}

impl<Meta: Send + Sync + 'static> TrackerSupervisor<Meta> {
    /// Starts `shard_count` shard workers, each registering `"{name}#{i}"`
    /// on `transport` as its inbound process name.
    pub fn start<H>(
        name: &str,
        shard_count: usize,
        config: TrackerConfig,
        transport: Arc<dyn ClusterTransport<TrackerMessage<H::Meta>>>,
        handler: Arc<H>,
    ) -> Result<Self, FabricError>
    where
        H: TrackerHandler<Meta = Meta>,
    {
        if shard_count == 0 {
            return Err(FabricError::config_invalid("tracker_pool_size must be nonzero"));
        }
        let shards = (0..shard_count)
            .map(|i| {
                let process = ProcessName::new(format!("{name}#{i}"));
                shard::spawn(i, process, config.clone(), Arc::clone(&transport), Arc::clone(&handler))
            })
            .collect();
        Ok(Self { shards, topic_cache: DashMap::new() })
    }

    fn shard_for(&self, topic: &Topic) -> &ShardHandle<Meta> {
        let idx = *self
            .topic_cache
            .entry(topic.clone())
            .or_insert_with(|| shard_of(topic, self.shards.len()));
        &self.shards[idx]
    }

    pub async fn track(
        &self,
        topic: Topic,
        key: bytes::Bytes,
        metadata: Meta,
        owner: Arc<dyn TrackedOwner>,
    ) -> Result<(), FabricError> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.shard_for(&topic)
            .cmd_tx
            .send_async(ShardCmd::Track { topic, key, metadata, owner, reply: reply_tx })
            .await
            .map_err(|_| FabricError::ChannelSend)?;
        reply_rx.recv_async().await.map_err(|_| FabricError::ChannelRecv)?
    }

    pub async fn untrack(&self, topic: Topic, key: bytes::Bytes) -> Result<(), FabricError> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.shard_for(&topic)
            .cmd_tx
            .send_async(ShardCmd::Untrack { topic, key, reply: reply_tx })
            .await
            .map_err(|_| FabricError::ChannelSend)?;
        reply_rx.recv_async().await.map_err(|_| FabricError::ChannelRecv)
    }

    /// Removes every entry registered by `owner`, wherever it landed.
    /// Every shard is asked, since a single owner may have tracked
    /// entries under topics hashing to different shards.
    pub async fn untrack_all(&self, owner: HandleId) {
        let asks = self.shards.iter().map(|shard| {
            let cmd_tx = shard.cmd_tx.clone();
            async move {
                let (reply_tx, reply_rx) = flume::bounded(1);
                if cmd_tx.send_async(ShardCmd::UntrackAll { owner, reply: reply_tx }).await.is_ok() {
                    let _ = reply_rx.recv_async().await;
                }
            }
        });
        join_all(asks).await;
    }

    pub async fn update(
        &self,
        topic: Topic,
        key: bytes::Bytes,
        update: Box<dyn FnOnce(Option<&Meta>) -> Meta + Send>,
    ) -> Result<(), FabricError> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.shard_for(&topic)
            .cmd_tx
            .send_async(ShardCmd::Update { topic, key, update, reply: reply_tx })
            .await
            .map_err(|_| FabricError::ChannelSend)?;
        reply_rx.recv_async().await.map_err(|_| FabricError::ChannelRecv)?
    }

    pub async fn list(&self, topic: Topic) -> Vec<PresenceEntry<Meta>> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        if self
            .shard_for(&topic)
            .cmd_tx
            .send_async(ShardCmd::List { topic, reply: reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.recv_async().await.unwrap_or_default()
    }

    pub async fn get_by_key(
        &self,
        topic: Topic,
        key: bytes::Bytes,
    ) -> Vec<(fabric_core::transport::NodeName, Arc<Meta>)> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        if self
            .shard_for(&topic)
            .cmd_tx
            .send_async(ShardCmd::GetByKey { topic, key, reply: reply_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.recv_async().await.unwrap_or_default()
    }

    /// Number of shard workers this supervisor started.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_rejects_zero_shards() {
        struct Stub;
        #[async_trait::async_trait]
        impl ClusterTransport<TrackerMessage<u32>> for Stub {
            fn this_node(&self) -> fabric_core::transport::NodeName {
                fabric_core::transport::NodeName::new("n")
            }
            fn list_peers(&self) -> Vec<fabric_core::transport::NodeName> {
                Vec::new()
            }
            async fn send_async(
                &self,
                _target: fabric_core::transport::NodeName,
                _process: ProcessName,
                _msg: TrackerMessage<u32>,
            ) {
            }
            fn monitor_nodes(&self) -> flume::Receiver<fabric_core::transport::NodeEvent> {
                flume::bounded(1).1
            }
            fn register(&self, _process: ProcessName) -> flume::Receiver<TrackerMessage<u32>> {
                flume::bounded(1).1
            }
        }

        let result = TrackerSupervisor::start(
            "t",
            0,
            TrackerConfig::default(),
            Arc::new(Stub) as Arc<dyn ClusterTransport<TrackerMessage<u32>>>,
            Arc::new(crate::handler::NoopHandler::<u32>::default()),
        );
        assert!(matches!(result, Err(FabricError::ConfigInvalid(_))));
    }
}
