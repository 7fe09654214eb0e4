//! Fabric error types.
//!
//! Comprehensive error handling for every subsystem in this workspace: the
//! local registry, the broadcast adapter, and (via re-export) the presence
//! tracker.

use thiserror::Error;

/// Main error type for fabric operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    /// A `track` call for a `(topic, key)` pair already tracked by this
    /// shard.
    #[error("already tracked")]
    AlreadyTracked,

    /// An `untrack`/`update`/`get_by_key` call referenced a pair this
    /// shard has no local record of.
    #[error("not tracked")]
    NotTracked,

    /// `direct_broadcast` targeted a node the transport does not list as
    /// a current peer.
    #[error("unknown peer")]
    UnknownPeer,

    /// The cluster transport could not reach a peer (distinct from
    /// `UnknownPeer`: the peer is known but unreachable right now).
    #[error("transport unreachable")]
    TransportUnreachable,

    /// `subscribe` was called with a handle that is already dead, or a
    /// dispatch discovered a handle's channel had disconnected.
    #[error("dead handle")]
    DeadHandle,

    /// Options failed validation, e.g. `broadcast_pool_size > pool_size`.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Sending on an internal control channel failed (receiver dropped).
    #[error("internal channel send failed")]
    ChannelSend,

    /// Receiving from an internal control channel failed (sender dropped).
    #[error("internal channel recv failed")]
    ChannelRecv,
}

/// Result type alias for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

impl FabricError {
    /// Create a configuration error with a message.
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Whether this error kind could plausibly clear on retry.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransportUnreachable)
    }
}

/// Error thrown by the `_or_panic` ("raising") convenience methods on the
/// `PubSub` facade. Wraps the underlying [`FabricError`].
#[derive(Debug, Clone, Error)]
#[error("broadcast failed: {0}")]
pub struct BroadcastError(#[from] pub FabricError);
