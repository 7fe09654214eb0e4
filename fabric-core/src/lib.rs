//! Fabric Core
//!
//! Runtime-agnostic building blocks shared by the rest of the workspace:
//! - Topics and shard assignment (`topic`)
//! - Subscriber handles (`handle`)
//! - Local delivery strategy (`dispatcher`)
//! - Sharded local subscription registry (`registry`)
//! - The abstract cluster transport contract (`transport`)
//! - Cross-node broadcast fan-out and safe pool-size migration (`adapter`)
//! - Per-instance metadata (`instance`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod instance;
pub mod registry;
pub mod topic;
pub mod transport;

pub mod prelude {
    pub use crate::adapter::{Adapter, DispatcherTable, Forward};
    pub use crate::dispatcher::{DefaultDispatcher, Dispatcher, DispatcherId, Entry, DEFAULT_DISPATCHER};
    pub use crate::error::{BroadcastError, FabricError, Result};
    pub use crate::handle::{ChannelSubscriber, HandleId, Subscriber};
    pub use crate::instance::InstanceMetadata;
    pub use crate::registry::Registry;
    pub use crate::topic::{shard_of, Topic};
    pub use crate::transport::{ClusterTransport, NodeEvent, NodeName, ProcessName};
}
