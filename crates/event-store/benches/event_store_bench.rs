use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{AppendOptions, EventEnvelope, EventStore, InMemoryEventStore, Version};

fn order_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    let (event_type, payload) = if version == 1 {
        (
            "Created",
            serde_json::json!({
                "type": "Created",
                "data": {
                    "user_id": 1,
                    "items": [{"product_id": 1, "quantity": 2, "price": 10.0}],
                    "total_cents": 2000
                }
            }),
        )
    } else {
        (
            "Paid",
            serde_json::json!({"type": "Paid", "data": {"transaction_id": null}}),
        )
    };

    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Order")
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(payload)
        .build()
        .unwrap()
}

fn bench_append_created(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    c.bench_function("event_store/append_created", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .append(
                        vec![order_event(AggregateId::new(), 1)],
                        AppendOptions::expect_new(),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    c.bench_function("event_store/append_created_then_paid", |b| {
        b.iter(|| {
            rt.block_on(async {
                let id = AggregateId::new();
                store
                    .append(vec![order_event(id, 1)], AppendOptions::expect_new())
                    .await
                    .unwrap();
                store
                    .append(
                        vec![order_event(id, 2)],
                        AppendOptions::expect_version(Version::first()),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_read_aggregate_in_large_log(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let target = AggregateId::new();

    // 10k other orders around the one being read.
    rt.block_on(async {
        for _ in 0..10_000 {
            store
                .append(
                    vec![order_event(AggregateId::new(), 1)],
                    AppendOptions::new(),
                )
                .await
                .unwrap();
        }
        store
            .append(
                vec![order_event(target, 1), order_event(target, 2)],
                AppendOptions::new(),
            )
            .await
            .unwrap();
    });

    c.bench_function("event_store/get_events_one_of_10k", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.get_events_for_aggregate(target).await.unwrap();
            });
        });
    });
}

fn bench_stream_all_events(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(async {
        for _ in 0..500 {
            let id = AggregateId::new();
            store
                .append(vec![order_event(id, 1), order_event(id, 2)], AppendOptions::new())
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.stream_all_events().await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_created,
    bench_append_lifecycle,
    bench_read_aggregate_in_large_log,
    bench_stream_all_events,
);
criterion_main!(benches);
