//! # Fabric
//!
//! A distributed publish/subscribe fabric with CRDT-replicated presence
//! tracking, layered over an abstract cluster transport.
//!
//! ## Architecture
//!
//! Fabric is structured with clean layering across three crates:
//!
//! - **`fabric-core`**: the local registry, cross-node broadcast adapter,
//!   dispatcher protocol, cluster transport trait, and error types.
//! - **`fabric-tracker`**: the CRDT-replicated presence tracker — shard
//!   workers, the gossip/anti-entropy wire protocol, the supervisor/router.
//! - **`fabric`** (this crate): the public `PubSub`/`Tracker` facades,
//!   instance configuration, an in-memory cluster transport for
//!   single-process clusters and tests, and tracing setup helpers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use fabric::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), fabric_core::error::FabricError> {
//! let cluster = LocalCluster::<Forward<String>>::new();
//! let transport = cluster.join("node-a");
//!
//! let ps: PubSub<String> = PubSub::start(Options::new("chat"), transport)?;
//!
//! let (sub, rx) = ChannelSubscriber::<String>::bounded(16);
//! ps.subscribe(Topic::from_static(b"room:1"), Arc::new(sub), ())?;
//! ps.broadcast(Topic::from_static(b"room:1"), "hello".to_string(), DEFAULT_DISPATCHER).await?;
//!
//! assert_eq!(*rx.recv_async().await.unwrap(), "hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Performance
//!
//! - **One thread per shard**: every registry shard, adapter receiver,
//!   and tracker shard runs its own `futures::executor::block_on` loop —
//!   no shared global lock on any hot path.
//! - **Zero-copy fan-out**: messages are wrapped in `Arc<M>` once and
//!   cloned as refcount bumps to every subscriber and peer.
//! - **Lock-free where it matters**: `dashmap` for the reverse subscriber
//!   index and instance metadata; `parking_lot` for the uncontended
//!   per-shard registry locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)] // Runtime-agnostic design
#![allow(clippy::missing_errors_doc)]

/// Instance configuration (`Options` builder).
pub mod config;
/// Development helpers (benches/tests).
pub mod dev_tracing;
/// In-memory cluster transport for single-process clusters and tests.
pub mod local_transport;
/// The PubSub facade.
pub mod pubsub;
/// The Tracker facade.
pub mod tracker_facade;

pub use bytes::Bytes;

/// Re-exports covering the common entry points of every crate in this
/// workspace, for `use fabric::prelude::*;`.
pub mod prelude {
    pub use crate::config::Options;
    pub use crate::local_transport::{LocalCluster, LocalTransport};
    pub use crate::pubsub::PubSub;
    pub use crate::tracker_facade::Tracker;

    pub use fabric_core::adapter::{Adapter, Forward};
    pub use fabric_core::dispatcher::{DefaultDispatcher, Dispatcher, DispatcherId, DEFAULT_DISPATCHER};
    pub use fabric_core::error::{BroadcastError, FabricError};
    pub use fabric_core::handle::{ChannelSubscriber, HandleId, Subscriber};
    pub use fabric_core::topic::Topic;
    pub use fabric_core::transport::{ClusterTransport, NodeEvent, NodeName, ProcessName};

    pub use fabric_tracker::handler::{NoopHandler, TrackerHandler};
    pub use fabric_tracker::owner::TrackedOwner;
    pub use fabric_tracker::shard::TrackerConfig;
    pub use fabric_tracker::wire::{PresenceEntry, TrackerMessage};
}
