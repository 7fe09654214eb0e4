//! Local registry dispatch throughput, at varying subscriber counts.
//!
//! Tests the PUBLIC API (`fabric_core::registry::Registry` plus
//! `DefaultDispatcher`) rather than a microbenchmark of private internals.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fabric_core::dispatcher::DefaultDispatcher;
use fabric_core::handle::{ChannelSubscriber, Subscriber};
use fabric_core::registry::Registry;
use fabric_core::topic::Topic;

const SUBSCRIBER_COUNTS: &[usize] = &[1, 10, 100, 1_000];

fn dispatch_to_n_subscribers(c: &mut Criterion) {
    fabric::dev_tracing::init_tracing();
    let mut group = c.benchmark_group("registry/dispatch");

    for &n in SUBSCRIBER_COUNTS {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let registry: Registry<u64> = Registry::new(8);
            let topic: Topic = Topic::from_static(b"bench:topic");
            let mut receivers = Vec::with_capacity(n);
            for _ in 0..n {
                let (sub, rx) = ChannelSubscriber::<u64>::bounded(4);
                registry.subscribe(topic.clone(), Arc::new(sub), ()).unwrap();
                receivers.push(rx);
            }

            b.iter(|| {
                registry.dispatch(&topic, None, Arc::new(black_box(7u64)), &DefaultDispatcher);
                for rx in &receivers {
                    let _ = rx.try_recv();
                }
            });
        });
    }
    group.finish();
}

fn subscribe_unsubscribe_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry/subscribe_unsubscribe");
    group.bench_function("churn_one_shard", |b| {
        let registry: Registry<u64> = Registry::new(1);
        let topic: Topic = Topic::from_static(b"bench:churn");

        b.iter(|| {
            let (sub, _rx) = ChannelSubscriber::<u64>::bounded(1);
            let id = sub.id();
            registry.subscribe(topic.clone(), Arc::new(sub), ()).unwrap();
            registry.unsubscribe(&topic, id);
        });
    });
    group.finish();
}

criterion_group!(benches, dispatch_to_n_subscribers, subscribe_unsubscribe_churn);
criterion_main!(benches);
