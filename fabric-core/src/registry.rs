//! Local subscription registry (spec §4.B).
//!
//! A sharded map from topic to a set of `(handle, value)` entries. Each
//! shard owns an independent `HashMap` guarded by its own
//! `parking_lot::RwLock` — no cross-shard coordination is required for
//! subscribe/unsubscribe, and a dispatcher panic on one shard's dispatch
//! path cannot poison another shard (`parking_lot` locks never poison).
//!
//! A subscription is stored in exactly one shard, chosen by
//! `shard_of(topic, shard_count)`. `(handle, topic)` may appear multiple
//! times in one shard; each occurrence produces its own delivery, and
//! `unsubscribe` removes every occurrence atomically (spec §3 data
//! model).

use std::sync::Arc;

use dashmap::DashMap;
use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::dispatcher::{Dispatcher, Entry};
use crate::error::FabricError;
use crate::handle::{HandleId, Subscriber};
use crate::topic::{shard_of, Topic};

type SlotVec<M, V> = Vec<Entry<M, V>>;

struct Shard<M, V> {
    topics: RwLock<HashMap<Topic, SlotVec<M, V>>>,
}

impl<M, V> Default for Shard<M, V> {
    fn default() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }
}

/// A sharded, concurrent topic-to-subscribers registry.
pub struct Registry<M, V = ()> {
    shards: Vec<Shard<M, V>>,
    /// handle id -> every (shard index, topic) it currently occupies.
    /// Shared rather than per-shard: written on every subscribe/
    /// unsubscribe/reap but read only during reaping, so `DashMap`'s own
    /// internal sharding serves this better than re-sharding it again.
    reverse: DashMap<HandleId, SmallVec<[(usize, Topic); 4]>>,
}

impl<M, V> Registry<M, V> {
    /// Creates a registry with `shard_count` independent shards.
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Shard::default()).collect(),
            reverse: DashMap::new(),
        }
    }

    /// Number of shards this registry was constructed with.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_index(&self, topic: &[u8]) -> usize {
        shard_of(topic, self.shards.len())
    }

    /// Registers `handle` as a subscriber of `topic` with an attached
    /// `value`. Duplicates of `(handle, topic)` are allowed; each becomes
    /// an independent delivery.
    ///
    /// Fails with [`FabricError::DeadHandle`] if `handle` is already dead
    /// at call time.
    pub fn subscribe(
        &self,
        topic: Topic,
        handle: Arc<dyn Subscriber<M>>,
        value: V,
    ) -> Result<(), FabricError> {
        if !handle.is_alive() {
            return Err(FabricError::DeadHandle);
        }
        let id = handle.id();
        let idx = self.shard_index(&topic);

        {
            let shard = &self.shards[idx];
            let mut topics = shard.topics.write();
            topics
                .entry(topic.clone())
                .or_default()
                .push(Entry::new(handle, id, value));
        }

        self.reverse.entry(id).or_default().push((idx, topic));
        Ok(())
    }

    /// Removes every `(handle, topic)` entry for this handle/topic pair
    /// in the owning shard. Idempotent — always succeeds, even if the
    /// handle was never subscribed.
    pub fn unsubscribe(&self, topic: &[u8], id: HandleId) {
        let idx = self.shard_index(topic);
        self.remove_from_shard(idx, topic, id);
        if let Some(mut occupied) = self.reverse.get_mut(&id) {
            occupied.retain(|(s, t)| !(*s == idx && t.as_ref() == topic));
        }
    }

    /// Removes every entry this handle holds, across every shard it
    /// touched. Called when a handle is discovered dead (send failure)
    /// or explicitly by a caller tearing down a connection.
    pub fn reap(&self, id: HandleId) {
        if let Some((_, occupied)) = self.reverse.remove(&id) {
            for (idx, topic) in occupied {
                self.remove_from_shard(idx, &topic, id);
            }
        }
    }

    fn remove_from_shard(&self, idx: usize, topic: &[u8], id: HandleId) {
        let shard = &self.shards[idx];
        let mut topics = shard.topics.write();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Snapshots the subscriber list for `topic` and hands it to
    /// `dispatcher`. The snapshot isolates dispatch from concurrent
    /// subscribe/unsubscribe on the same shard: a dispatch observes
    /// either a subscription or its removal, never a half-applied state.
    ///
    /// Dead handles discovered during the callback are reaped afterward;
    /// the dispatcher itself is responsible for deciding what "dead"
    /// means for its own delivery attempt (it calls `Subscriber::send`,
    /// which reports disconnection).
    pub fn dispatch(
        &self,
        topic: &[u8],
        sender: Option<HandleId>,
        message: Arc<M>,
        dispatcher: &dyn Dispatcher<M, V>,
    ) {
        let idx = self.shard_index(topic);
        let shard = &self.shards[idx];

        let snapshot: Vec<Entry<M, V>> = {
            let topics = shard.topics.read();
            match topics.get(topic) {
                Some(entries) => entries.iter().map(Entry::snapshot_clone).collect(),
                None => return,
            }
        };

        if snapshot.is_empty() {
            return;
        }

        dispatcher.dispatch(&snapshot, sender, &message);

        let dead: Vec<HandleId> = snapshot
            .iter()
            .filter(|e| !e.handle.is_alive())
            .map(|e| e.id)
            .collect();
        for id in dead {
            self.reap(id);
        }
    }

    /// Whether `topic` currently has any subscribers in this registry.
    #[must_use]
    pub fn has_subscribers(&self, topic: &[u8]) -> bool {
        let idx = self.shard_index(topic);
        let topics = self.shards[idx].topics.read();
        topics.get(topic).is_some_and(|v| !v.is_empty())
    }

    /// Total number of `(handle, topic)` entries across every shard.
    /// Intended for tests and diagnostics, not the hot path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.topics.read().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Whether the registry currently holds no subscriptions at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DefaultDispatcher;
    use crate::handle::ChannelSubscriber;
    use bytes::Bytes;

    fn sub(cap: usize) -> (Arc<ChannelSubscriber<u32>>, HandleId, flume::Receiver<Arc<u32>>) {
        let (s, rx) = ChannelSubscriber::<u32>::bounded(cap);
        let id = s.id();
        (Arc::new(s), id, rx)
    }

    #[test]
    fn subscribe_then_broadcast_then_unsubscribe() {
        let reg: Registry<u32, ()> = Registry::new(4);
        let topic = Bytes::from_static(b"room:1");
        let (handle, id, rx) = sub(8);

        reg.subscribe(topic.clone(), handle, ()).unwrap();
        reg.dispatch(&topic, None, Arc::new(1), &DefaultDispatcher);
        assert_eq!(*rx.try_recv().unwrap(), 1);

        reg.unsubscribe(&topic, id);
        reg.dispatch(&topic, None, Arc::new(2), &DefaultDispatcher);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_subscribe_yields_duplicate_delivery_and_single_unsubscribe_clears_both() {
        let reg: Registry<u32, ()> = Registry::new(4);
        let topic = Bytes::from_static(b"t");
        let (s, rx) = ChannelSubscriber::<u32>::bounded(8);
        let id = s.id();
        let handle: Arc<dyn Subscriber<u32>> = Arc::new(s);

        reg.subscribe(topic.clone(), Arc::clone(&handle), ()).unwrap();
        reg.subscribe(topic.clone(), Arc::clone(&handle), ()).unwrap();

        reg.dispatch(&topic, None, Arc::new(5), &DefaultDispatcher);
        let mut seen = Vec::new();
        while let Ok(m) = rx.try_recv() {
            seen.push(*m);
        }
        assert_eq!(seen, vec![5, 5]);

        reg.unsubscribe(&topic, id);
        reg.dispatch(&topic, None, Arc::new(6), &DefaultDispatcher);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribe_rejects_already_dead_handle() {
        let reg: Registry<u32, ()> = Registry::new(4);
        let (handle, _, rx) = sub(1);
        drop(rx);
        let err = reg
            .subscribe(Bytes::from_static(b"t"), handle, ())
            .unwrap_err();
        assert_eq!(err, FabricError::DeadHandle);
    }

    #[test]
    fn dead_handle_is_reaped_during_dispatch() {
        let reg: Registry<u32, ()> = Registry::new(4);
        let topic = Bytes::from_static(b"t");
        let (s, rx) = ChannelSubscriber::<u32>::bounded(1);
        let handle: Arc<dyn Subscriber<u32>> = Arc::new(s);
        reg.subscribe(topic.clone(), handle, ()).unwrap();
        drop(rx);

        reg.dispatch(&topic, None, Arc::new(1), &DefaultDispatcher);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn different_topics_land_in_independent_shards_without_cross_talk() {
        let reg: Registry<u32, ()> = Registry::new(8);
        let (h1, _, r1) = sub(8);
        let (h2, _, r2) = sub(8);

        reg.subscribe(Bytes::from_static(b"a"), h1, ()).unwrap();
        reg.subscribe(Bytes::from_static(b"b"), h2, ()).unwrap();

        reg.dispatch(b"a", None, Arc::new(1), &DefaultDispatcher);
        assert_eq!(*r1.try_recv().unwrap(), 1);
        assert!(r2.try_recv().is_err());
    }
}
