//! Subscriber handles.
//!
//! A subscriber handle is an opaque reference to a mailbox-like endpoint
//! (spec data model, §3). The registry never interprets it beyond
//! identity comparison and sending; liveness is observed passively, via
//! `send` returning [`FabricError::DeadHandle`] once the underlying
//! channel has disconnected, rather than via a separate monitor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::FabricError;

/// Opaque identity for a subscriber handle, assigned at registration
/// time. Used by the default dispatcher's sender-exclusion logic and as
/// the registry's reverse-index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocates a fresh, process-wide unique id.
    #[must_use]
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// A mailbox-like endpoint capable of receiving an asynchronous message
/// of type `M`. The registry treats this as identity-comparable and
/// send-only.
pub trait Subscriber<M>: Send + Sync {
    /// This handle's stable identity.
    fn id(&self) -> HandleId;

    /// Whether this handle's mailbox is still reachable.
    fn is_alive(&self) -> bool;

    /// Hand a message off to the mailbox (enqueue, not deliver-and-wait).
    ///
    /// Returns [`FabricError::DeadHandle`] if the mailbox has gone away.
    /// A slow or full mailbox is the subscriber's own problem (spec §5) —
    /// this call must not block the calling shard; implementations that
    /// wrap a bounded channel should drop-oldest or similar rather than
    /// block here.
    fn send(&self, message: Arc<M>) -> Result<(), FabricError>;
}

/// A [`Subscriber`] backed by a `flume` channel.
///
/// Bounded with a fixed capacity; once full, the oldest queued message is
/// dropped to make room rather than blocking the sender (the documented
/// drop policy from spec §5 for a non-blocking hand-off).
pub struct ChannelSubscriber<M> {
    id: HandleId,
    tx: flume::Sender<Arc<M>>,
}

impl<M> ChannelSubscriber<M> {
    /// Creates a new bounded channel pair and wraps the sender half.
    ///
    /// `capacity` is the mailbox's buffering depth before the oldest
    /// pending message starts getting dropped.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, flume::Receiver<Arc<M>>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            Self {
                id: HandleId::fresh(),
                tx,
            },
            rx,
        )
    }

    /// Wraps an existing sender, e.g. one shared by several handles.
    #[must_use]
    pub fn from_sender(tx: flume::Sender<Arc<M>>) -> Self {
        Self {
            id: HandleId::fresh(),
            tx,
        }
    }
}

impl<M: Send + Sync> Subscriber<M> for ChannelSubscriber<M> {
    fn id(&self) -> HandleId {
        self.id
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_disconnected()
    }

    fn send(&self, message: Arc<M>) -> Result<(), FabricError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Disconnected(_)) => Err(FabricError::DeadHandle),
            Err(flume::TrySendError::Full(msg)) => {
                // Oldest-drop: make room by discarding one queued message,
                // then retry once. If the queue keeps racing ahead of us,
                // the message is simply dropped — a full mailbox means a
                // slow subscriber, which is not the broadcaster's problem.
                let _ = self.tx.try_recv();
                let _ = self.tx.try_send(msg);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        let a = HandleId::fresh();
        let b = HandleId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn send_after_disconnect_reports_dead() {
        let (sub, rx) = ChannelSubscriber::<u32>::bounded(4);
        drop(rx);
        assert!(!sub.is_alive());
        assert_eq!(sub.send(Arc::new(1)), Err(FabricError::DeadHandle));
    }

    #[test]
    fn full_mailbox_drops_oldest_instead_of_blocking() {
        let (sub, rx) = ChannelSubscriber::<u32>::bounded(2);
        sub.send(Arc::new(1)).unwrap();
        sub.send(Arc::new(2)).unwrap();
        sub.send(Arc::new(3)).unwrap(); // would block on a truly full bounded channel
        let mut seen = Vec::new();
        while let Ok(m) = rx.try_recv() {
            seen.push(*m);
        }
        assert_eq!(seen, vec![2, 3]);
    }
}
