//! Integration tests for the concrete scenarios from the pubsub/tracker
//! design (a handful of `LocalTransport`-backed "nodes" sharing one
//! process), grounded on the teacher crate's own style of exercising
//! the public API end-to-end rather than internals.

use std::sync::Arc;
use std::time::Duration;

use fabric::prelude::*;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const NO_MESSAGE_TIMEOUT: Duration = Duration::from_millis(50);

struct AlwaysAlive(HandleId);

impl TrackedOwner for AlwaysAlive {
    fn id(&self) -> HandleId {
        self.0
    }

    fn is_alive(&self) -> bool {
        true
    }
}

#[test]
fn scenario1_single_node_subscribe_broadcast_unsubscribe() {
    let cluster = LocalCluster::<Forward<u32>>::new();
    let transport = cluster.join("node-a");
    let ps: PubSub<u32> = PubSub::start(Options::new("scenario1"), transport).unwrap();

    let (sub, rx) = ChannelSubscriber::<u32>::bounded(8);
    let id = sub.id();
    let topic = Topic::from_static(b"room:1");
    ps.subscribe(topic.clone(), Arc::new(sub), ()).unwrap();

    futures::executor::block_on(ps.broadcast(topic.clone(), 1, DEFAULT_DISPATCHER)).unwrap();
    assert_eq!(*rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);

    ps.unsubscribe(b"room:1", id);
    futures::executor::block_on(ps.broadcast(topic, 2, DEFAULT_DISPATCHER)).unwrap();
    assert!(rx.recv_timeout(NO_MESSAGE_TIMEOUT).is_err());
}

#[test]
fn scenario2_two_node_cross_broadcast() {
    let cluster = LocalCluster::<Forward<u32>>::new();
    let a = cluster.join("a");
    let b = cluster.join("b");

    let ps_a: PubSub<u32> = PubSub::start(Options::new("t"), a).unwrap();
    let ps_b: PubSub<u32> = PubSub::start(Options::new("t"), b).unwrap();

    let (sub, rx) = ChannelSubscriber::<u32>::bounded(8);
    let topic = Topic::from_static(b"t");
    ps_a.subscribe(topic.clone(), Arc::new(sub), ()).unwrap();

    futures::executor::block_on(ps_b.broadcast(topic, 42, DEFAULT_DISPATCHER)).unwrap();

    assert_eq!(*rx.recv_timeout(RECV_TIMEOUT).unwrap(), 42);
}

#[test]
fn scenario3_broadcast_from_excludes_sender_locally_only() {
    let cluster = LocalCluster::<Forward<u32>>::new();
    let a = cluster.join("a");
    let ps: PubSub<u32> = PubSub::start(Options::new("t"), a).unwrap();

    let (h, rx_h) = ChannelSubscriber::<u32>::bounded(8);
    let h_id = h.id();
    let (h2, rx_h2) = ChannelSubscriber::<u32>::bounded(8);
    let topic = Topic::from_static(b"t");
    ps.subscribe(topic.clone(), Arc::new(h), ()).unwrap();
    ps.subscribe(topic.clone(), Arc::new(h2), ()).unwrap();

    futures::executor::block_on(ps.broadcast_from(h_id, topic, 7, DEFAULT_DISPATCHER)).unwrap();

    assert!(rx_h.recv_timeout(NO_MESSAGE_TIMEOUT).is_err());
    assert_eq!(*rx_h2.recv_timeout(RECV_TIMEOUT).unwrap(), 7);
}

#[test]
fn scenario4_tracker_replicates_and_purges_on_node_down() {
    let cluster = LocalCluster::<TrackerMessage<String>>::new();
    let a = cluster.join("a");
    let b = cluster.join("b");

    let config = Options::new("presence")
        .with_tracker_pool_size(1)
        .with_broadcast_period(Duration::from_millis(30))
        .with_permdown_period(Duration::from_millis(200));

    let tracker_a: Tracker<NoopHandler<String>> =
        Tracker::start(config.clone(), a, Arc::new(NoopHandler::default())).unwrap();
    let tracker_b: Tracker<NoopHandler<String>> =
        Tracker::start(config, b, Arc::new(NoopHandler::default())).unwrap();

    let owner = Arc::new(AlwaysAlive(HandleId::fresh()));
    futures::executor::block_on(tracker_a.track(
        Topic::from_static(b"room:1"),
        bytes::Bytes::from_static(b"user:42"),
        "a".to_string(),
        owner,
    ))
    .unwrap();

    std::thread::sleep(Duration::from_millis(200));

    let seen = futures::executor::block_on(tracker_b.list(Topic::from_static(b"room:1")));
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, bytes::Bytes::from_static(b"user:42"));
    assert_eq!(*seen[0].metadata, "a");

    cluster.evict(&NodeName::new("a"));
    std::thread::sleep(Duration::from_millis(100));

    let seen_after = futures::executor::block_on(tracker_b.list(Topic::from_static(b"room:1")));
    assert!(seen_after.is_empty());
}

#[test]
fn scenario5_pool_size_migration_reaches_both_nodes() {
    let cluster = LocalCluster::<Forward<u32>>::new();
    let a = cluster.join("a");
    let b = cluster.join("b");

    let opts = Options::new("migrating").with_pool_size(2).with_broadcast_pool_size(1);
    let ps_a: PubSub<u32> = PubSub::start(opts.clone(), a).unwrap();
    let ps_b: PubSub<u32> = PubSub::start(opts, b).unwrap();

    let (sub_a, rx_a) = ChannelSubscriber::<u32>::bounded(8);
    let (sub_b, rx_b) = ChannelSubscriber::<u32>::bounded(8);
    let topic = Topic::from_static(b"any:topic");
    ps_a.subscribe(topic.clone(), Arc::new(sub_a), ()).unwrap();
    ps_b.subscribe(topic.clone(), Arc::new(sub_b), ()).unwrap();

    futures::executor::block_on(ps_a.broadcast(topic, 99, DEFAULT_DISPATCHER)).unwrap();

    assert_eq!(*rx_a.recv_timeout(RECV_TIMEOUT).unwrap(), 99);
    assert_eq!(*rx_b.recv_timeout(RECV_TIMEOUT).unwrap(), 99);
}

#[test]
fn scenario6_duplicate_subscribe_doubles_delivery_single_unsubscribe_clears_both() {
    let cluster = LocalCluster::<Forward<u32>>::new();
    let a = cluster.join("a");
    let ps: PubSub<u32> = PubSub::start(Options::new("t"), a).unwrap();

    let (sub, rx) = ChannelSubscriber::<u32>::bounded(8);
    let id = sub.id();
    let handle: Arc<dyn Subscriber<u32>> = Arc::new(sub);
    let topic = Topic::from_static(b"t");
    ps.subscribe(topic.clone(), Arc::clone(&handle), ()).unwrap();
    ps.subscribe(topic.clone(), Arc::clone(&handle), ()).unwrap();

    futures::executor::block_on(ps.broadcast(topic.clone(), 1, DEFAULT_DISPATCHER)).unwrap();
    assert_eq!(*rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);
    assert_eq!(*rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);
    assert!(rx.recv_timeout(NO_MESSAGE_TIMEOUT).is_err());

    ps.unsubscribe(b"t", id);
    futures::executor::block_on(ps.broadcast(topic, 2, DEFAULT_DISPATCHER)).unwrap();
    assert!(rx.recv_timeout(NO_MESSAGE_TIMEOUT).is_err());
}
