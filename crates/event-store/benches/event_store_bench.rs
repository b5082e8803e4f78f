use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    EventEnvelope, EventStore, ExpectedVersion, InMemoryEventStore, InMemorySnapshotStore,
    Snapshot, SnapshotStore, Version,
};

fn make_event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("User")
        .event_type("Renamed")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "type": "Renamed",
            "data": { "name": format!("user-{version}") }
        }))
        .try_build()
        .unwrap()
}

fn bench_insert_new_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/insert_new_stream", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                store
                    .append(vec![make_event(agg_id, 1)], ExpectedVersion::NoStream)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_checked_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/checked_update_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let agg_id = AggregateId::new();
                store
                    .append(vec![make_event(agg_id, 1)], ExpectedVersion::NoStream)
                    .await
                    .unwrap();
                let batch: Vec<_> = (2..=11).map(|v| make_event(agg_id, v)).collect();
                store
                    .append(batch, ExpectedVersion::Exact(Version::first()))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_load_tail_after_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let agg_id = AggregateId::new();

    rt.block_on(async {
        let events: Vec<_> = (1..=100).map(|v| make_event(agg_id, v)).collect();
        store.append(events, ExpectedVersion::NoStream).await.unwrap();
    });

    c.bench_function("event_store/load_stream_from_90", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .load_stream_from(agg_id, Version::new(90))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_snapshot_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("snapshot_store/insert_then_update", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemorySnapshotStore::new();
                let agg_id = AggregateId::new();
                let now = chrono::Utc::now();
                let state = serde_json::json!({"name": "John"});
                store
                    .insert(Snapshot::new(agg_id, "User", Version::first(), now, state.clone()))
                    .await
                    .unwrap();
                store
                    .update(
                        Snapshot::new(agg_id, "User", Version::new(2), now, state),
                        Version::first(),
                    )
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_insert_new_stream,
    bench_checked_update,
    bench_load_tail_after_snapshot,
    bench_snapshot_update,
);
criterion_main!(benches);
