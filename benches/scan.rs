use criterion::{Criterion, black_box, criterion_group, criterion_main};
use keyway::Storage;
use keyway::catalog::{DatabaseSchema, IndexSchema, StoreSchema, Value};
use keyway::config::StorageConfig;
use keyway::query::Query;
use keyway::scan::{Directive, IteratorSpec};
use keyway::storage::MemoryBackend;
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

const STORE: &str = "users";
const SEEDED_ROWS: i64 = 10_000;

async fn setup(rows: i64) -> Storage {
    let schema = DatabaseSchema::new(vec![
        StoreSchema::new(STORE, Some("id"))
            .with_index(IndexSchema::new("age"))
            .with_index(IndexSchema::new("city")),
    ]);
    let storage = Storage::new("bench", schema.clone(), StorageConfig::default());
    storage.connect(Arc::new(MemoryBackend::new("bench", schema)));
    for id in 0..rows {
        let user = Value::from(json!({
            "id": id,
            "name": format!("user-{id}"),
            "age": 18 + id % 60,
            "city": format!("city-{}", id % 25),
        }));
        storage
            .put(STORE, user, None)
            .expect("schedule put")
            .await
            .expect("put");
    }
    storage
}

fn bench_scans(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let storage = rt.block_on(setup(SEEDED_ROWS));

    c.bench_function("full_value_scan", |b| {
        b.iter(|| {
            let total = rt
                .block_on(
                    storage
                        .reduce(IteratorSpec::values(STORE), |n, _| n + 1, 0usize)
                        .expect("schedule"),
                )
                .expect("reduce");
            black_box(total)
        })
    });

    c.bench_function("index_range_count_query", |b| {
        let query = Query::from(STORE)
            .where_range("age", ">=", 30, "<", 40)
            .and_then(|q| q.where_("name", "!=", "user-7"))
            .and_then(|q| q.select("count", &[]))
            .expect("query");
        b.iter(|| {
            let result = rt
                .block_on(storage.fetch(&query).expect("schedule"))
                .expect("fetch");
            black_box(result)
        })
    });

    c.bench_function("joint_index_scan", |b| {
        b.iter(|| {
            let specs = vec![
                IteratorSpec::index_keys(STORE, "age"),
                IteratorSpec::index_keys(STORE, "city").unique(),
            ];
            rt.block_on(
                storage
                    .scan(specs, |tuple| {
                        black_box(tuple.len());
                        vec![Directive::Advance, Directive::Advance]
                    })
                    .expect("schedule"),
            )
            .expect("scan");
        })
    });
}

criterion_group!(benches, bench_scans);
criterion_main!(benches);
