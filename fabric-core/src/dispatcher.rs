//! Dispatcher protocol (spec §4.G).
//!
//! A dispatcher is the per-subscription local delivery strategy: given a
//! shard's snapshot of subscription entries for a topic, decide who gets
//! the message. The contract: a dispatcher must not block the registry
//! shard indefinitely, and its work should be O(entries) with bounded
//! per-entry cost. No error from a dispatcher propagates to the
//! broadcaster — failures are logged and swallowed.

use std::sync::Arc;

use crate::handle::{HandleId, Subscriber};

/// Identifies a dispatcher by name so cross-node `Forward` messages can
/// name one without shipping a trait object over the wire. Each node
/// resolves the id against its own locally registered dispatchers — the
/// dispatcher implementation itself must be deployed on every node that
/// might receive a forward naming it.
pub type DispatcherId = &'static str;

/// The identifier under which [`DefaultDispatcher`] is always registered.
pub const DEFAULT_DISPATCHER: DispatcherId = "default";

/// One subscription entry as handed to a dispatcher: the subscriber
/// handle plus the arbitrary, subscription-scoped value attached at
/// subscribe time.
pub struct Entry<M, V> {
    pub(crate) handle: Arc<dyn Subscriber<M>>,
    pub(crate) id: HandleId,
    pub(crate) value: Arc<V>,
}

impl<M, V> Entry<M, V> {
    pub(crate) fn new(handle: Arc<dyn Subscriber<M>>, id: HandleId, value: V) -> Self {
        Self {
            handle,
            id,
            value: Arc::new(value),
        }
    }

    /// A cheap (refcount-bump) clone, used when snapshotting a shard's
    /// entry list for dispatch.
    pub(crate) fn snapshot_clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }

    /// This entry's subscriber handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn Subscriber<M>> {
        &self.handle
    }

    /// This entry's subscriber identity.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// This entry's subscription-scoped value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }
}

/// A local delivery strategy for one topic's subscriber snapshot.
pub trait Dispatcher<M, V = ()>: Send + Sync {
    /// Deliver `message` to some subset of `entries`.
    ///
    /// `sender` is `None` for cross-node broadcasts and for local
    /// broadcasts with no originating handle to exclude (spec Design
    /// Notes §9: remote-originated broadcasts always see `sender=None`,
    /// even if a custom dispatcher would otherwise filter on it).
    fn dispatch(&self, entries: &[Entry<M, V>], sender: Option<HandleId>, message: &Arc<M>);
}

/// The default dispatcher: send to everyone, except the sending handle
/// when one is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDispatcher;

impl<M, V> Dispatcher<M, V> for DefaultDispatcher {
    fn dispatch(&self, entries: &[Entry<M, V>], sender: Option<HandleId>, message: &Arc<M>) {
        for entry in entries {
            if Some(entry.id) == sender {
                continue;
            }
            if let Err(err) = entry.handle.send(Arc::clone(message)) {
                tracing::debug!(handle = %entry.id, error = %err, "dispatch to dead handle");
            }
        }
    }
}
