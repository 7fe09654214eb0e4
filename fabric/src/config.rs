//! Instance configuration (spec §6 configuration table).
//!
//! Built in the teacher crate's `with_*` builder style
//! (`monocoque_core::options::SocketOptions`), generalized from socket
//! timeouts/buffer sizes to pool sizes and gossip intervals.

use std::time::Duration;

use fabric_core::error::FabricError;

/// Configuration shared by a `PubSub` and `Tracker` instance pair built
/// under the same `name`.
///
/// `pool_size` and its dependents default relative to the host's core
/// count; every other field can be overridden with a `with_*` builder
/// method before the instance is started.
#[derive(Debug, Clone)]
pub struct Options {
    /// Identifier of the instance, unique per node.
    pub name: String,
    /// Number of adapter receive shards.
    pub pool_size: usize,
    /// Number of adapter shards used when sending (`<= pool_size`).
    pub broadcast_pool_size: usize,
    /// Number of local registry shards.
    pub registry_size: usize,
    /// Number of tracker shards.
    pub tracker_pool_size: usize,
    /// Tracker heartbeat/anti-entropy interval.
    pub broadcast_period: Duration,
    /// Timeout before a peer tracker shard ref is declared permanently down.
    pub permdown_period: Duration,
    /// Soft-down threshold; informational only, not enforced by this crate.
    pub down_period: Duration,
}

fn default_pool_size() -> usize {
    ((num_cpus::get() + 3) / 4).max(1)
}

impl Options {
    /// Starts from the documented defaults: `pool_size` is one adapter
    /// shard per four cores (minimum 1); `broadcast_pool_size` and
    /// `registry_size` default to `pool_size`; `tracker_pool_size`
    /// defaults to 1.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let pool_size = default_pool_size();
        Self {
            name: name.into(),
            pool_size,
            broadcast_pool_size: pool_size,
            registry_size: pool_size,
            tracker_pool_size: 1,
            broadcast_period: Duration::from_millis(1500),
            permdown_period: Duration::from_secs(25),
            down_period: Duration::from_secs(10),
        }
    }

    /// Sets the number of adapter receive shards.
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Sets the number of adapter shards used when sending.
    #[must_use]
    pub fn with_broadcast_pool_size(mut self, broadcast_pool_size: usize) -> Self {
        self.broadcast_pool_size = broadcast_pool_size;
        self
    }

    /// Sets the number of local registry shards.
    #[must_use]
    pub fn with_registry_size(mut self, registry_size: usize) -> Self {
        self.registry_size = registry_size;
        self
    }

    /// Sets the number of tracker shards.
    #[must_use]
    pub fn with_tracker_pool_size(mut self, tracker_pool_size: usize) -> Self {
        self.tracker_pool_size = tracker_pool_size;
        self
    }

    /// Sets the tracker heartbeat/anti-entropy interval.
    #[must_use]
    pub fn with_broadcast_period(mut self, period: Duration) -> Self {
        self.broadcast_period = period;
        self
    }

    /// Sets the timeout before a peer tracker shard ref is declared permdown.
    #[must_use]
    pub fn with_permdown_period(mut self, period: Duration) -> Self {
        self.permdown_period = period;
        self
    }

    /// Sets the soft-down threshold.
    #[must_use]
    pub fn with_down_period(mut self, period: Duration) -> Self {
        self.down_period = period;
        self
    }

    /// Checks the cross-field invariant `broadcast_pool_size <= pool_size`
    /// (spec §4.H) plus the nonzero requirements `Adapter::start` and
    /// `TrackerSupervisor::start` otherwise reject at construction time.
    pub fn validate(&self) -> Result<(), FabricError> {
        if self.pool_size == 0 {
            return Err(FabricError::config_invalid("pool_size must be nonzero"));
        }
        if self.broadcast_pool_size == 0 || self.broadcast_pool_size > self.pool_size {
            return Err(FabricError::config_invalid(
                "broadcast_pool_size must be nonzero and <= pool_size",
            ));
        }
        if self.registry_size == 0 {
            return Err(FabricError::config_invalid("registry_size must be nonzero"));
        }
        if self.tracker_pool_size == 0 {
            return Err(FabricError::config_invalid("tracker_pool_size must be nonzero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(Options::new("test").validate().is_ok());
    }

    #[test]
    fn broadcast_pool_size_above_pool_size_is_invalid() {
        let opts = Options::new("test").with_pool_size(2).with_broadcast_pool_size(3);
        assert!(matches!(opts.validate(), Err(FabricError::ConfigInvalid(_))));
    }

    #[test]
    fn broadcast_pool_size_below_pool_size_is_valid_mid_migration() {
        let opts = Options::new("test").with_pool_size(2).with_broadcast_pool_size(1);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn zero_pool_size_is_invalid() {
        let opts = Options::new("test").with_pool_size(0);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn zero_tracker_pool_size_is_invalid() {
        let opts = Options::new("test").with_tracker_pool_size(0);
        assert!(opts.validate().is_err());
    }
}
