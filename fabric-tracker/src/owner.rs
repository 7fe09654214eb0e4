//! Liveness for a tracker entry's owning handle (spec §4.E invariant R1).
//!
//! Mirrors `fabric_core::handle::Subscriber`'s passive-liveness design:
//! there is no push-based monitor here either. A shard sweeps its owners
//! for death opportunistically on every gossip tick and emits the
//! corresponding `untrack_all` for any that have gone away.

pub use fabric_core::handle::HandleId;

/// The local entity a tracker entry is attributed to. `track` callers
/// supply one; when it stops being alive, every entry it registered is
/// removed and a `remove` delta is emitted.
pub trait TrackedOwner: Send + Sync {
    fn id(&self) -> HandleId;
    fn is_alive(&self) -> bool;
}
