//! CRDT-replicated presence tracker (spec §4.E, §4.F).
//!
//! A tracker is a fixed pool of shards, each an independent OR-Set CRDT
//! replica gossiping deltas with its peers over a
//! [`fabric_core::transport::ClusterTransport`]. `track`/`untrack`/
//! `update`/`list`/`get_by_key` are routed to the shard a topic hashes
//! to; `untrack_all` fans out to every shard since one owner's entries
//! may span more than one.

#![deny(unsafe_code)]

pub mod handler;
pub mod owner;
pub mod router;
pub mod shard;
pub mod wire;

pub mod prelude {
    pub use crate::handler::{NoopHandler, TrackerHandler};
    pub use crate::owner::{HandleId, TrackedOwner};
    pub use crate::router::TrackerSupervisor;
    pub use crate::shard::{ShardCmd, ShardHandle, TrackerConfig};
    pub use crate::wire::{
        Delta, DeltaKind, Diff, DiffMap, FullEntry, Heartbeat, PresenceEntry, ShardRef, TrackKey,
        TrackerMessage, TransferReply, TransferRequest,
    };
}
