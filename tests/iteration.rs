use keyway::Storage;
use keyway::catalog::{DatabaseSchema, IndexSchema, StoreSchema, Value};
use keyway::config::StorageConfig;
use keyway::error::DbErrorCode;
use keyway::query::{CompareOp, Predicate};
use keyway::scan::{Directive, IteratorSpec, Tuple};
use keyway::storage::{KeyRange, MemoryBackend};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn schema() -> DatabaseSchema {
    DatabaseSchema::new(vec![
        StoreSchema::new("st", Some("id"))
            .with_index(IndexSchema::new("value"))
            .with_index(IndexSchema::new("tag")),
    ])
}

async fn seeded() -> Storage {
    let storage = Storage::new("scan", schema(), StorageConfig::default());
    storage.connect(Arc::new(MemoryBackend::new("scan", schema())));
    for (i, tag) in ["a", "b", "a", "c", "b"].into_iter().enumerate() {
        let n = i as i64 + 1;
        let record = Value::from(json!({ "id": format!("qs{n}"), "value": n, "tag": tag }));
        storage
            .put("st", record, None)
            .expect("schedule put")
            .await
            .expect("put");
    }
    storage
}

fn texts(items: &[&str]) -> Vec<Value> {
    items.iter().map(|s| Value::text(s)).collect()
}

async fn mapped(storage: &Storage, spec: IteratorSpec) -> Vec<Value> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let out = seen.clone();
    storage
        .map(spec, move |value| out.lock().push(value.clone()))
        .expect("schedule map")
        .await
        .expect("map");
    let values = seen.lock().clone();
    values
}

#[tokio::test]
async fn stopped_scan_resumes_after_last_delivered_record() {
    let storage = seeded().await;
    let spec = IteratorSpec::keys("st");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let out = seen.clone();
    storage
        .scan(vec![spec.clone()], move |tuple| {
            let mut seen = out.lock();
            seen.push(tuple.key(0).cloned().expect("key"));
            if seen.len() == 2 {
                vec![Directive::Stop]
            } else {
                vec![Directive::Advance]
            }
        })
        .expect("schedule scan")
        .await
        .expect("scan");
    assert_eq!(*seen.lock(), texts(&["qs1", "qs2"]));
    assert_eq!(spec.state().primary_key, Some(Value::text("qs2")));
    assert!(!spec.state().done);

    let rest = mapped(&storage, spec.clone()).await;
    assert_eq!(rest, texts(&["qs3", "qs4", "qs5"]));
    assert!(spec.state().done);

    // an exhausted spec starts over
    assert_eq!(mapped(&storage, spec).await.len(), 5);
}

#[tokio::test]
async fn joint_scan_reports_stopped_slots_as_empty() {
    let storage = seeded().await;
    let tuples = Arc::new(Mutex::new(Vec::<Tuple>::new()));
    let out = tuples.clone();
    storage
        .scan(
            vec![IteratorSpec::keys("st"), IteratorSpec::index_keys("st", "tag")],
            move |tuple| {
                out.lock().push(tuple.clone());
                vec![Directive::Advance, Directive::Stop]
            },
        )
        .expect("schedule scan")
        .await
        .expect("scan");

    let tuples = tuples.lock();
    assert_eq!(tuples.len(), 5);
    assert_eq!(tuples[0].len(), 2);
    assert_eq!(tuples[0].key(1), Some(&Value::text("a")));
    assert_eq!(tuples[0].value(1), Some(&Value::text("qs1")));
    assert!(tuples[1..].iter().all(|t| t.key(1).is_none()));
    assert_eq!(tuples[4].key(0), Some(&Value::text("qs5")));
}

#[tokio::test]
async fn open_cursor_can_seek_forward_but_not_back() {
    let storage = seeded().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let out = seen.clone();
    storage
        .open(IteratorSpec::keys("st"), move |pos| {
            out.lock().push(pos.primary_key.clone());
            if pos.primary_key == &Value::text("qs1") {
                Directive::SeekTo(Value::text("qs4"))
            } else {
                Directive::Advance
            }
        })
        .expect("schedule open")
        .await
        .expect("open");
    assert_eq!(*seen.lock(), texts(&["qs1", "qs4", "qs5"]));

    let err = storage
        .open(IteratorSpec::keys("st"), |_| Directive::SeekTo(Value::text("qs0")))
        .expect("schedule open")
        .await
        .expect_err("backwards seek");
    assert_eq!(err.code(), DbErrorCode::Argument);
}

#[tokio::test]
async fn unique_directions_yield_one_entry_per_index_key() {
    let storage = seeded().await;
    let tags = mapped(&storage, IteratorSpec::index_keys("st", "tag").unique()).await;
    assert_eq!(tags, texts(&["a", "b", "c"]));

    let firsts = mapped(
        &storage,
        IteratorSpec::index_values("st", "tag").reverse().unique(),
    )
    .await;
    assert_eq!(firsts, texts(&["qs4", "qs5", "qs3"]));
}

#[tokio::test]
async fn reduce_folds_records_within_a_range() {
    let storage = seeded().await;
    let range = KeyRange::bounded(Some(Value::Integer(2)), Some(Value::Integer(4)), false, true)
        .expect("range");
    let spec = IteratorSpec::index_keys("st", "value").with_range(range);
    let total = storage
        .reduce(spec, |acc, key| acc + key.as_f64().unwrap_or(0.0), 0.0)
        .expect("schedule reduce")
        .await
        .expect("reduce");
    assert_eq!(total, 5.0);
}

#[tokio::test]
async fn filtered_pages_continue_where_the_limit_stopped() {
    let storage = seeded().await;
    let spec = IteratorSpec::values("st")
        .with_filter(Predicate::compare("value", CompareOp::Gt, 1))
        .with_offset(1)
        .with_limit(2);
    let ids = |records: Vec<Value>| -> Vec<Value> {
        records
            .iter()
            .filter_map(|r| r.get_path("id").cloned())
            .collect()
    };
    assert_eq!(ids(mapped(&storage, spec.clone()).await), texts(&["qs3", "qs4"]));
    assert_eq!(ids(mapped(&storage, spec.clone()).await), texts(&["qs5"]));
    assert!(spec.state().done);
}

#[tokio::test]
async fn unknown_index_is_rejected_before_scheduling() {
    let storage = seeded().await;
    let err = storage
        .map(IteratorSpec::index_keys("st", "missing"), |_| {})
        .expect_err("unknown index");
    assert_eq!(err.code(), DbErrorCode::IndexNotFound);
}
