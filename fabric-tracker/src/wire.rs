//! Tracker wire shapes (spec §6, §4.E).
//!
//! Everything a tracker shard sends to or receives from a peer shard: the
//! anti-entropy heartbeat, and the request/reply pair used for a full
//! state transfer when a heartbeat's delta set would be too large (or a
//! gap is detected) to apply incrementally.

use std::sync::Arc;

use fabric_core::topic::Topic;

/// Bytes identifying the tracked subject within a topic (e.g. a user id).
/// Opaque and exact-match, exactly like [`Topic`].
pub type TrackKey = bytes::Bytes;

/// Identity of one tracker shard incarnation: the node it runs on plus a
/// randomly generated 128-bit incarnation id picked at shard start. A
/// shard restart produces a fresh incarnation, so peers observe it as a
/// brand new replica rather than a resurrected one (spec Design Notes §9).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardRef {
    pub node: fabric_core::transport::NodeName,
    pub incarnation: u128,
}

impl std::fmt::Display for ShardRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{:x}", self.node, self.incarnation)
    }
}

/// One CRDT mutation: either a fresh entry, or the removal of one this
/// shard previously added.
#[derive(Debug, Clone)]
pub enum DeltaKind<Meta> {
    Add(Arc<Meta>),
    Remove,
}

/// A single tagged mutation in a shard's delta log, identified uniquely by
/// `(owner_shard_ref, clock)` (spec Design Notes §9).
#[derive(Debug, Clone)]
pub struct Delta<Meta> {
    pub clock: u64,
    pub topic: Topic,
    pub key: TrackKey,
    pub owner_shard_ref: ShardRef,
    pub kind: DeltaKind<Meta>,
}

/// Periodic liveness + delta message sent between tracker shards.
#[derive(Debug, Clone)]
pub struct Heartbeat<Meta> {
    pub sender_ref: ShardRef,
    pub sender_clock: u64,
    pub deltas: Vec<Delta<Meta>>,
}

/// Sent when a receiver detects a gap it cannot close incrementally (the
/// sender's delta log no longer reaches back far enough, or this is the
/// first heartbeat seen from a fresh incarnation). Addressed to the
/// shard that owns the data being requested.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender_ref: ShardRef,
}

/// One entry in a full-state push: enough to reconstruct a `values` row
/// without replaying history.
#[derive(Debug, Clone)]
pub struct FullEntry<Meta> {
    pub topic: Topic,
    pub key: TrackKey,
    pub owner_shard_ref: ShardRef,
    pub metadata: Arc<Meta>,
    pub clock: u64,
}

/// Reply to a [`TransferRequest`]: every entry this shard currently owns.
#[derive(Debug, Clone)]
pub struct TransferReply<Meta> {
    pub sender_ref: ShardRef,
    pub sender_clock: u64,
    pub full_state: Vec<FullEntry<Meta>>,
}

/// Everything one tracker shard may send another over the cluster
/// transport.
#[derive(Debug, Clone)]
pub enum TrackerMessage<Meta> {
    Heartbeat(Heartbeat<Meta>),
    TransferRequest(TransferRequest),
    TransferReply(TransferReply<Meta>),
}

/// One `(key, metadata)` pair as returned by `list`/`get_by_key` and as
/// carried in a [`Diff`].
#[derive(Debug, Clone)]
pub struct PresenceEntry<Meta> {
    pub key: TrackKey,
    pub metadata: Arc<Meta>,
}

/// Joins and leaves observed for one topic during a single merge.
#[derive(Debug, Clone, Default)]
pub struct Diff<Meta> {
    pub joins: Vec<PresenceEntry<Meta>>,
    pub leaves: Vec<PresenceEntry<Meta>>,
}

/// Per-topic diff handed to [`crate::handler::TrackerHandler::handle_diff`].
pub type DiffMap<Meta> = std::collections::HashMap<Topic, Diff<Meta>>;
