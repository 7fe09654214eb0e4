//! Tracker shard: the OR-Set CRDT worker (spec §4.E).
//!
//! One shard owns a private, single-threaded view of `values` / peer
//! clocks / a bounded delta log; every operation — user command, inbound
//! gossip, a tick, a node-down event — is serialized through one
//! `futures::select!` loop, the same thread-per-worker shape the teacher
//! crate uses for `RouterHub::run`/`PubSubHub::run`. No field here is
//! ever touched from outside the worker's own thread.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fabric_core::error::FabricError;
use fabric_core::topic::Topic;
use fabric_core::transport::{ClusterTransport, NodeEvent, NodeName, ProcessName};
use futures::future::join_all;
use futures::FutureExt;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::handler::TrackerHandler;
use crate::owner::{HandleId, TrackedOwner};
use crate::wire::{
    Delta, DeltaKind, DiffMap, FullEntry, Heartbeat, PresenceEntry, ShardRef, TrackKey,
    TrackerMessage, TransferReply, TransferRequest,
};

/// Tuning for one shard's anti-entropy behavior.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base interval between gossip ticks; each tick is jittered by
    /// `±25%` to desynchronize shards across the cluster.
    pub broadcast_period: Duration,
    /// How long a peer shard ref may go without a heartbeat before it is
    /// declared permanently down and its entries purged.
    pub permdown_period: Duration,
    /// Maximum deltas to attach to one heartbeat before falling back to
    /// asking the peer for a full-state transfer instead.
    pub delta_budget: usize,
    /// How many of the most recent deltas to retain in the log,
    /// regardless of whether every peer has consumed them.
    pub delta_log_cap: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            broadcast_period: Duration::from_millis(1500),
            permdown_period: Duration::from_secs(25),
            delta_budget: 256,
            delta_log_cap: 4096,
        }
    }
}

struct ValueEntry<Meta> {
    metadata: Arc<Meta>,
    clock: u64,
}

struct PeerState {
    last_seen_clock: u64,
    last_heartbeat_at: Instant,
}

/// A command sent to a running shard worker from `TrackerSupervisor`.
pub enum ShardCmd<Meta> {
    Track {
        topic: Topic,
        key: TrackKey,
        metadata: Meta,
        owner: Arc<dyn TrackedOwner>,
        reply: flume::Sender<Result<(), FabricError>>,
    },
    Untrack {
        topic: Topic,
        key: TrackKey,
        reply: flume::Sender<()>,
    },
    UntrackAll {
        owner: HandleId,
        reply: flume::Sender<()>,
    },
    Update {
        topic: Topic,
        key: TrackKey,
        update: Box<dyn FnOnce(Option<&Meta>) -> Meta + Send>,
        reply: flume::Sender<Result<(), FabricError>>,
    },
    List {
        topic: Topic,
        reply: flume::Sender<Vec<PresenceEntry<Meta>>>,
    },
    GetByKey {
        topic: Topic,
        key: TrackKey,
        reply: flume::Sender<Vec<(NodeName, Arc<Meta>)>>,
    },
}

/// A live handle to a running shard worker: a command channel plus the
/// static facts about it that `TrackerSupervisor` needs for routing.
pub struct ShardHandle<Meta> {
    pub shard_index: usize,
    pub cmd_tx: flume::Sender<ShardCmd<Meta>>,
}

/// Spawns a shard worker thread and returns a handle to it.
///
/// `process` is the name this shard registers on the transport; every
/// node running the same `shard_index` must register the same name so
/// peers can address it without knowing the remote incarnation ahead of
/// time.
pub fn spawn<H>(
    shard_index: usize,
    process: ProcessName,
    config: TrackerConfig,
    transport: Arc<dyn ClusterTransport<TrackerMessage<H::Meta>>>,
    handler: Arc<H>,
) -> ShardHandle<H::Meta>
where
    H: TrackerHandler,
{
    let (cmd_tx, cmd_rx) = flume::unbounded();
    let inbound_rx = transport.register(process.clone());
    let node_events = transport.monitor_nodes();
    let (tick_tx, tick_rx) = flume::bounded::<()>(1);

    let period = config.broadcast_period;
    std::thread::Builder::new()
        .name(format!("fabric-tracker-ticker-{shard_index}"))
        .spawn(move || loop {
            let jitter = rand::thread_rng().gen_range(0.75..=1.25);
            std::thread::sleep(period.mul_f64(jitter));
            if tick_tx.send(()).is_err() {
                break;
            }
        })
        .expect("failed to spawn tracker ticker thread");

    let worker = ShardWorker {
        shard_index,
        process,
        config,
        transport,
        cmd_rx,
        inbound_rx,
        tick_rx,
        node_events,
        handler,
        this_ref: ShardRef {
            node: NodeName::new("unresolved"),
            incarnation: fresh_incarnation(),
        },
        local_clock: 0,
        local_owned: HashMap::new(),
        owners: HashMap::new(),
        values: HashMap::new(),
        peers: HashMap::new(),
        delta_log: VecDeque::new(),
        sent_clock: HashMap::new(),
        state: None,
    };

    std::thread::Builder::new()
        .name(format!("fabric-tracker-shard-{shard_index}"))
        .spawn(move || futures::executor::block_on(worker.run()))
        .expect("failed to spawn tracker shard thread");

    ShardHandle { shard_index, cmd_tx }
}

fn fresh_incarnation() -> u128 {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed) as u128;
    let random: u128 = rand::thread_rng().gen();
    random ^ (seq << 64)
}

struct ShardWorker<H: TrackerHandler> {
    shard_index: usize,
    /// The process name this shard registered on the transport; every
    /// node running the same `shard_index` registers the same name, so
    /// this is also how a peer addresses a heartbeat or transfer message
    /// back to us.
    process: ProcessName,
    config: TrackerConfig,
    transport: Arc<dyn ClusterTransport<TrackerMessage<H::Meta>>>,
    cmd_rx: flume::Receiver<ShardCmd<H::Meta>>,
    inbound_rx: flume::Receiver<TrackerMessage<H::Meta>>,
    tick_rx: flume::Receiver<()>,
    node_events: flume::Receiver<NodeEvent>,
    handler: Arc<H>,

    this_ref: ShardRef,
    local_clock: u64,
    /// `(topic, key)` -> the owner that registered it on this shard.
    local_owned: HashMap<(Topic, TrackKey), HandleId>,
    owners: HashMap<HandleId, Arc<dyn TrackedOwner>>,
    /// `topic -> (key, owner_shard_ref) -> entry`. Nested so `list` and
    /// permdown purges don't scan topics that aren't affected.
    values: HashMap<Topic, BTreeMap<(TrackKey, ShardRef), ValueEntry<H::Meta>>>,
    peers: HashMap<ShardRef, PeerState>,
    delta_log: VecDeque<Delta<H::Meta>>,
    /// Last clock of ours a given peer node has been sent, for computing
    /// each tick's outgoing delta slice.
    sent_clock: HashMap<NodeName, u64>,
    state: Option<H::State>,
}

impl<H: TrackerHandler> ShardWorker<H> {
    async fn run(mut self) {
        self.this_ref = ShardRef {
            node: self.transport.this_node(),
            incarnation: self.this_ref.incarnation,
        };
        self.state = Some(self.handler.init());

        loop {
            futures::select! {
                cmd = self.cmd_rx.recv_async().fuse() => match cmd {
                    Ok(cmd) => self.handle_cmd(cmd),
                    Err(_) => break,
                },
                msg = self.inbound_rx.recv_async().fuse() => match msg {
                    Ok(TrackerMessage::Heartbeat(hb)) => self.handle_heartbeat(hb).await,
                    Ok(TrackerMessage::TransferRequest(req)) => self.handle_transfer_request(req).await,
                    Ok(TrackerMessage::TransferReply(reply)) => self.handle_transfer_reply(reply),
                    Err(_) => break,
                },
                tick = self.tick_rx.recv_async().fuse() => match tick {
                    Ok(()) => self.on_tick().await,
                    Err(_) => break,
                },
                event = self.node_events.recv_async().fuse() => {
                    if let Ok(NodeEvent::Down(node)) = event {
                        self.on_node_down(node);
                    }
                },
            }
        }
    }

    fn next_clock(&mut self) -> u64 {
        self.local_clock += 1;
        self.local_clock
    }

    fn push_delta(&mut self, delta: Delta<H::Meta>) {
        self.delta_log.push_back(delta);
        while self.delta_log.len() > self.config.delta_log_cap {
            self.delta_log.pop_front();
        }
    }

    fn handle_cmd(&mut self, cmd: ShardCmd<H::Meta>) {
        match cmd {
            ShardCmd::Track { topic, key, metadata, owner, reply } => {
                let _ = reply.send(self.track(topic, key, metadata, owner));
            }
            ShardCmd::Untrack { topic, key, reply } => {
                self.untrack(&topic, &key);
                let _ = reply.send(());
            }
            ShardCmd::UntrackAll { owner, reply } => {
                self.untrack_all(owner);
                let _ = reply.send(());
            }
            ShardCmd::Update { topic, key, update, reply } => {
                let _ = reply.send(self.update(topic, key, update));
            }
            ShardCmd::List { topic, reply } => {
                let _ = reply.send(self.list(&topic));
            }
            ShardCmd::GetByKey { topic, key, reply } => {
                let _ = reply.send(self.get_by_key(&topic, &key));
            }
        }
    }

    fn track(
        &mut self,
        topic: Topic,
        key: TrackKey,
        metadata: H::Meta,
        owner: Arc<dyn TrackedOwner>,
    ) -> Result<(), FabricError> {
        if self.local_owned.contains_key(&(topic.clone(), key.clone())) {
            return Err(FabricError::AlreadyTracked);
        }
        let clock = self.next_clock();
        let metadata = Arc::new(metadata);
        self.values
            .entry(topic.clone())
            .or_default()
            .insert((key.clone(), self.this_ref.clone()), ValueEntry { metadata: Arc::clone(&metadata), clock });
        self.local_owned.insert((topic.clone(), key.clone()), owner.id());
        self.owners.entry(owner.id()).or_insert(owner);
        self.push_delta(Delta {
            clock,
            topic,
            key,
            owner_shard_ref: self.this_ref.clone(),
            kind: DeltaKind::Add(metadata),
        });
        Ok(())
    }

    fn untrack(&mut self, topic: &Topic, key: &TrackKey) {
        self.local_owned.remove(&(topic.clone(), key.clone()));
        let removed = self
            .values
            .get_mut(topic)
            .and_then(|m| m.remove(&(key.clone(), self.this_ref.clone())));
        if removed.is_some() {
            let clock = self.next_clock();
            self.push_delta(Delta {
                clock,
                topic: topic.clone(),
                key: key.clone(),
                owner_shard_ref: self.this_ref.clone(),
                kind: DeltaKind::Remove,
            });
        }
    }

    fn untrack_all(&mut self, owner: HandleId) {
        let owned: Vec<(Topic, TrackKey)> = self
            .local_owned
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(k, _)| k.clone())
            .collect();
        for (topic, key) in owned {
            self.untrack(&topic, &key);
        }
        self.owners.remove(&owner);
    }

    fn update(
        &mut self,
        topic: Topic,
        key: TrackKey,
        f: Box<dyn FnOnce(Option<&H::Meta>) -> H::Meta + Send>,
    ) -> Result<(), FabricError> {
        let Some(&owner) = self.local_owned.get(&(topic.clone(), key.clone())) else {
            return Err(FabricError::NotTracked);
        };
        let current = self
            .values
            .get(&topic)
            .and_then(|m| m.get(&(key.clone(), self.this_ref.clone())))
            .map(|e| Arc::clone(&e.metadata));
        let new_metadata = f(current.as_deref());

        // remove+add with a fresh clock, as spec §4.E prescribes.
        self.untrack(&topic, &key);
        self.local_owned.insert((topic.clone(), key.clone()), owner);

        let clock = self.next_clock();
        let metadata = Arc::new(new_metadata);
        self.values
            .entry(topic.clone())
            .or_default()
            .insert((key.clone(), self.this_ref.clone()), ValueEntry { metadata: Arc::clone(&metadata), clock });
        self.push_delta(Delta {
            clock,
            topic,
            key,
            owner_shard_ref: self.this_ref.clone(),
            kind: DeltaKind::Add(metadata),
        });
        Ok(())
    }

    fn list(&self, topic: &Topic) -> Vec<PresenceEntry<H::Meta>> {
        self.values
            .get(topic)
            .map(|m| {
                m.iter()
                    .map(|((key, _owner), entry)| PresenceEntry {
                        key: key.clone(),
                        metadata: Arc::clone(&entry.metadata),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn get_by_key(&self, topic: &Topic, key: &TrackKey) -> Vec<(NodeName, Arc<H::Meta>)> {
        self.values
            .get(topic)
            .map(|m| {
                m.iter()
                    .filter(|((k, _), _)| k == key)
                    .map(|((_, owner), entry)| (owner.node.clone(), Arc::clone(&entry.metadata)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply_delta(&mut self, delta: Delta<H::Meta>, diff: &mut DiffMap<H::Meta>) {
        let topic = delta.topic.clone();
        match delta.kind {
            DeltaKind::Add(metadata) => {
                self.values.entry(topic.clone()).or_default().insert(
                    (delta.key.clone(), delta.owner_shard_ref.clone()),
                    ValueEntry { metadata: Arc::clone(&metadata), clock: delta.clock },
                );
                diff.entry(topic).or_default().joins.push(PresenceEntry {
                    key: delta.key,
                    metadata,
                });
            }
            DeltaKind::Remove => {
                let removed = self
                    .values
                    .get_mut(&topic)
                    .and_then(|m| m.remove(&(delta.key.clone(), delta.owner_shard_ref.clone())));
                if let Some(entry) = removed {
                    diff.entry(topic).or_default().leaves.push(PresenceEntry {
                        key: delta.key,
                        metadata: entry.metadata,
                    });
                }
            }
        }
    }

    async fn handle_heartbeat(&mut self, hb: Heartbeat<H::Meta>) {
        let is_new_ref = !self.peers.contains_key(&hb.sender_ref);
        let mut diff: DiffMap<H::Meta> = HashMap::new();

        if is_new_ref {
            let stale: Vec<ShardRef> = self
                .peers
                .keys()
                .filter(|r| r.node == hb.sender_ref.node)
                .cloned()
                .collect();
            for stale_ref in stale {
                debug!(shard = self.shard_index, peer = %stale_ref, "superseded by fresh incarnation, purging");
                self.purge_shard_ref(&stale_ref, &mut diff);
                self.peers.remove(&stale_ref);
            }
            debug!(shard = self.shard_index, peer = %hb.sender_ref, "new peer shard ref");
            self.peers.insert(
                hb.sender_ref.clone(),
                PeerState { last_seen_clock: 0, last_heartbeat_at: Instant::now() },
            );
        }

        let watermark = self.peers.get(&hb.sender_ref).map_or(0, |p| p.last_seen_clock);
        let mut sorted = hb.deltas;
        sorted.sort_by_key(|d| d.clock);
        let mut max_clock = watermark;
        for delta in sorted {
            if delta.clock <= watermark {
                continue; // stale or duplicate: idempotent merge (R3)
            }
            max_clock = max_clock.max(delta.clock);
            self.apply_delta(delta, &mut diff);
        }
        if let Some(peer) = self.peers.get_mut(&hb.sender_ref) {
            peer.last_seen_clock = max_clock;
            peer.last_heartbeat_at = Instant::now();
        }

        if !diff.is_empty() {
            self.emit_diff(diff);
        }

        if hb.sender_clock > max_clock {
            // A gap: the sender has deltas beyond what fit in this
            // heartbeat. Ask it to push its full current state instead
            // of waiting for the gap to close on its own.
            debug!(
                shard = self.shard_index,
                peer = %hb.sender_ref,
                sender_clock = hb.sender_clock,
                have = max_clock,
                "gap detected, requesting full-state transfer"
            );
            let process = self.process.clone();
            let request = TrackerMessage::TransferRequest(TransferRequest { sender_ref: self.this_ref.clone() });
            self.transport.send_async(hb.sender_ref.node.clone(), process, request).await;
        }
    }

    async fn handle_transfer_request(&mut self, req: TransferRequest) {
        let this_ref = self.this_ref.clone();
        let mut full_state = Vec::new();
        for (topic, entries) in &self.values {
            for ((key, owner), entry) in entries {
                if *owner == this_ref {
                    full_state.push(FullEntry {
                        topic: topic.clone(),
                        key: key.clone(),
                        owner_shard_ref: owner.clone(),
                        metadata: Arc::clone(&entry.metadata),
                        clock: entry.clock,
                    });
                }
            }
        }
        let reply = TrackerMessage::TransferReply(TransferReply {
            sender_ref: this_ref,
            sender_clock: self.local_clock,
            full_state,
        });
        let process = self.process.clone();
        self.transport.send_async(req.sender_ref.node, process, reply).await;
    }

    fn handle_transfer_reply(&mut self, reply: TransferReply<H::Meta>) {
        debug!(
            shard = self.shard_index,
            peer = %reply.sender_ref,
            entries = reply.full_state.len(),
            "applying full-state transfer"
        );
        let mut diff: DiffMap<H::Meta> = HashMap::new();
        self.purge_shard_ref(&reply.sender_ref, &mut diff);
        for entry in reply.full_state {
            self.values.entry(entry.topic.clone()).or_default().insert(
                (entry.key.clone(), entry.owner_shard_ref.clone()),
                ValueEntry { metadata: Arc::clone(&entry.metadata), clock: entry.clock },
            );
            diff.entry(entry.topic).or_default().joins.push(PresenceEntry {
                key: entry.key,
                metadata: entry.metadata,
            });
        }
        self.peers.insert(
            reply.sender_ref,
            PeerState { last_seen_clock: reply.sender_clock, last_heartbeat_at: Instant::now() },
        );
        if !diff.is_empty() {
            self.emit_diff(diff);
        }
    }

    /// Removes every entry owned by `shard_ref`, accumulating a `leaves`
    /// diff for each one removed.
    fn purge_shard_ref(&mut self, shard_ref: &ShardRef, diff: &mut DiffMap<H::Meta>) {
        for (topic, entries) in self.values.iter_mut() {
            let doomed: Vec<(TrackKey, ShardRef)> =
                entries.keys().filter(|(_, owner)| owner == shard_ref).cloned().collect();
            for key in doomed {
                if let Some(entry) = entries.remove(&key) {
                    diff.entry(topic.clone()).or_default().leaves.push(PresenceEntry {
                        key: key.0,
                        metadata: entry.metadata,
                    });
                }
            }
        }
        self.values.retain(|_, m| !m.is_empty());
    }

    fn emit_diff(&mut self, diff: DiffMap<H::Meta>) {
        let state = self.state.take().expect("shard state initialized at startup");
        self.state = Some(self.handler.handle_diff(&diff, state));
    }

    fn on_node_down(&mut self, node: NodeName) {
        let dead: Vec<ShardRef> = self.peers.keys().filter(|r| r.node == node).cloned().collect();
        if !dead.is_empty() {
            warn!(shard = self.shard_index, %node, count = dead.len(), "node down, purging its shard refs");
        }
        let mut diff: DiffMap<H::Meta> = HashMap::new();
        for shard_ref in dead {
            self.purge_shard_ref(&shard_ref, &mut diff);
            self.peers.remove(&shard_ref);
        }
        self.sent_clock.remove(&node);
        if !diff.is_empty() {
            self.emit_diff(diff);
        }
    }

    async fn on_tick(&mut self) {
        self.sweep_dead_owners();
        self.sweep_permdown();

        let peers = self.transport.list_peers();
        if peers.is_empty() {
            return;
        }
        let fanout = gossip_fanout(peers.len());
        let mut rng = rand::thread_rng();
        let mut chosen: Vec<NodeName> = peers;
        chosen.shuffle(&mut rng);
        chosen.truncate(fanout);

        let process = self.process.clone();

        // Build each peer's heartbeat synchronously first (touches only
        // `self`'s own tables), then fire the sends concurrently — avoids
        // holding any borrow of `self` across the `.await` below.
        let mut outgoing: Vec<(NodeName, Heartbeat<H::Meta>)> = Vec::with_capacity(chosen.len());
        for peer in chosen {
            let since = self.sent_clock.get(&peer).copied().unwrap_or(0);
            let pending: Vec<Delta<H::Meta>> =
                self.delta_log.iter().filter(|d| d.clock > since).cloned().collect();
            let deltas = if pending.len() <= self.config.delta_budget {
                pending
            } else {
                self.delta_log.iter().rev().take(self.config.delta_budget).cloned().collect()
            };
            self.sent_clock.insert(peer.clone(), self.local_clock);
            outgoing.push((
                peer,
                Heartbeat { sender_ref: self.this_ref.clone(), sender_clock: self.local_clock, deltas },
            ));
        }

        let transport = Arc::clone(&self.transport);
        let sends = outgoing.into_iter().map(|(peer, heartbeat)| {
            let transport = Arc::clone(&transport);
            let process = process.clone();
            async move {
                transport.send_async(peer, process, TrackerMessage::Heartbeat(heartbeat)).await;
            }
        });
        join_all(sends).await;
    }

    fn sweep_dead_owners(&mut self) {
        let dead: Vec<HandleId> =
            self.owners.iter().filter(|(_, o)| !o.is_alive()).map(|(id, _)| *id).collect();
        for id in dead {
            self.untrack_all(id);
        }
    }

    fn sweep_permdown(&mut self) {
        let now = Instant::now();
        let stale: Vec<ShardRef> = self
            .peers
            .iter()
            .filter(|(_, st)| now.duration_since(st.last_heartbeat_at) > self.config.permdown_period)
            .map(|(r, _)| r.clone())
            .collect();
        if stale.is_empty() {
            return;
        }
        let mut diff: DiffMap<H::Meta> = HashMap::new();
        for shard_ref in stale {
            warn!(shard = self.shard_index, peer = %shard_ref, period = ?self.config.permdown_period, "peer permdown");
            self.purge_shard_ref(&shard_ref, &mut diff);
            self.peers.remove(&shard_ref);
            self.sent_clock.remove(&shard_ref.node);
        }
        if !diff.is_empty() {
            self.emit_diff(diff);
        }
    }
}

/// `ceil(ln(n + 1)) + 1`, the anti-entropy fan-out the spec's Design
/// Notes recommend, clamped to the number of peers available.
fn gossip_fanout(n_peers: usize) -> usize {
    if n_peers == 0 {
        return 0;
    }
    let estimate = ((n_peers as f64 + 1.0).ln().ceil() as usize) + 1;
    estimate.clamp(1, n_peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gossip_fanout_never_exceeds_peer_count() {
        for n in 0..64 {
            assert!(gossip_fanout(n) <= n.max(1));
        }
    }

    #[test]
    fn gossip_fanout_grows_with_peer_count() {
        assert!(gossip_fanout(20) >= gossip_fanout(2));
    }
}
