//! Performance benchmarks for a3s-broadcast
//!
//! Run with: cargo bench

use a3s_broadcast::{Action, Event, MemoryBroker, Payload, Publisher, Topology};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn purchase_payload() -> Payload {
    serde_json::json!({"productId": "LAPTOP-001", "amount": 1299.99, "currency": "USD"})
        .as_object()
        .cloned()
        .unwrap_or_default()
}

fn bench_event_serialization(c: &mut Criterion) {
    let event = Event::new("purchase", "bob456", purchase_payload());

    c.bench_function("Event serialize", |b| {
        b.iter(|| event.to_bytes().unwrap());
    });

    let bytes = event.to_bytes().unwrap();
    c.bench_function("Event deserialize", |b| {
        b.iter(|| Event::from_bytes(&bytes).unwrap());
    });
}

fn bench_memory_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("fanout_publish");
    for queues in [1, 4, 16] {
        group.bench_function(format!("{} queues", queues), |b| {
            b.to_async(&rt).iter(|| async move {
                let broker = MemoryBroker::new();
                (0..queues)
                    .fold(Topology::new("user_actions"), |t, i| {
                        t.with_queue(format!("queue_{}", i))
                    })
                    .setup(&broker)
                    .await
                    .unwrap();
                let publisher = Publisher::connect(Arc::new(broker), "user_actions")
                    .await
                    .unwrap();
                for i in 0..100 {
                    publisher
                        .publish(Action::new(
                            "login",
                            format!("user{}", i),
                            serde_json::json!({"ip": "10.0.0.1"}),
                        ))
                        .await
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_event_serialization, bench_memory_fanout);
criterion_main!(benches);
