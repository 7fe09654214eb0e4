//! Topics and sharding.
//!
//! A topic is an opaque byte string compared for exact equality (spec
//! data model, §3). `shard_of` is the one hash used everywhere a topic
//! must be assigned to a shard: local registry shards, adapter pool
//! shards, and tracker shards all call it with their own shard count.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// An opaque topic name. Cheap to clone (refcounted byte buffer).
pub type Topic = bytes::Bytes;

/// Assigns `topic` to one of `shard_count` shards.
///
/// `shard_count` must be `> 0`; callers are expected to validate pool
/// sizes at construction time (see `fabric::Options::validate`).
#[must_use]
pub fn shard_of(topic: &[u8], shard_count: usize) -> usize {
    debug_assert!(shard_count > 0, "shard_count must be nonzero");
    let mut hasher = DefaultHasher::new();
    topic.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_of_is_deterministic() {
        let a = shard_of(b"room:1", 8);
        let b = shard_of(b"room:1", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn shard_of_is_in_range() {
        for n in 1..=32 {
            let s = shard_of(b"some-topic", n);
            assert!(s < n);
        }
    }

    #[test]
    fn different_topics_can_differ() {
        let shards: std::collections::HashSet<_> =
            (0..64).map(|i| shard_of(format!("topic-{i}").as_bytes(), 8)).collect();
        assert!(shards.len() > 1, "hash should spread topics across shards");
    }
}
