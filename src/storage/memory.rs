use crate::catalog::schema::{DatabaseSchema, IndexSchema, StoreSchema};
use crate::catalog::types::{Record, Value};
use crate::config::BackendKind;
use crate::error::DbError;
use crate::storage::backend::{
    Backend, BackendFactory, CursorRequest, ReadyCallback, Transaction, TransactionMode,
};
use crate::storage::cursor::{Cursor, CursorEntry, EntryCursor};
use crate::storage::key_range::KeyRange;
use im::{HashMap, OrdMap, OrdSet};
use parking_lot::{Mutex, RwLock};
use std::mem;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, warn};

type IndexData = OrdMap<Value, OrdSet<Value>>;

#[derive(Debug, Clone, Default)]
struct StoreData {
    records: OrdMap<Value, Record>,
    indexes: HashMap<String, IndexData>,
    next_key: i64,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    stores: HashMap<String, StoreData>,
}

enum Lifecycle {
    Pending(Vec<ReadyCallback>),
    Open,
    Failed(DbError),
    Closed,
}

/// Ordered in-process store keeping every version as a persistent map, so a
/// transaction snapshot is a clone of the root.
pub struct MemoryBackend {
    name: String,
    schema: Arc<DatabaseSchema>,
    data: Arc<RwLock<Snapshot>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

/// Settles the connection of a backend created with [`MemoryBackend::deferred`].
pub struct OpenHandle {
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl OpenHandle {
    pub fn succeed(self) {
        self.settle(Ok(()));
    }

    pub fn fail(self, err: DbError) {
        self.settle(Err(err));
    }

    fn settle(self, result: Result<(), DbError>) {
        let waiting = {
            let mut lifecycle = self.lifecycle.lock();
            let next = match &result {
                Ok(()) => Lifecycle::Open,
                Err(err) => Lifecycle::Failed(err.clone()),
            };
            match mem::replace(&mut *lifecycle, next) {
                Lifecycle::Pending(callbacks) => callbacks,
                previous => {
                    *lifecycle = previous;
                    return;
                }
            }
        };
        for callback in waiting {
            callback(result.clone());
        }
    }
}

impl MemoryBackend {
    /// A backend whose connection is open immediately.
    pub fn new(name: &str, schema: DatabaseSchema) -> Self {
        Self::with_lifecycle(name, schema, Lifecycle::Open)
    }

    /// A backend that stays opening until the returned handle settles it.
    pub fn deferred(name: &str, schema: DatabaseSchema) -> (Self, OpenHandle) {
        let backend = Self::with_lifecycle(name, schema, Lifecycle::Pending(Vec::new()));
        let handle = OpenHandle {
            lifecycle: backend.lifecycle.clone(),
        };
        (backend, handle)
    }

    fn with_lifecycle(name: &str, schema: DatabaseSchema, lifecycle: Lifecycle) -> Self {
        let mut snapshot = Snapshot::default();
        for store in &schema.stores {
            let mut data = StoreData {
                next_key: 1,
                ..StoreData::default()
            };
            for index in &store.indexes {
                data.indexes.insert(index.name.clone(), OrdMap::new());
            }
            snapshot.stores.insert(store.name.clone(), data);
        }
        Self {
            name: name.to_string(),
            schema: Arc::new(schema),
            data: Arc::new(RwLock::new(snapshot)),
            lifecycle: Arc::new(Mutex::new(lifecycle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_ready(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Open)
    }

    fn on_ready(&self, callback: ReadyCallback) {
        let settled = {
            let mut lifecycle = self.lifecycle.lock();
            match &mut *lifecycle {
                Lifecycle::Pending(callbacks) => {
                    callbacks.push(callback);
                    return;
                }
                Lifecycle::Open => Ok(()),
                Lifecycle::Failed(err) => Err(err.clone()),
                Lifecycle::Closed => Err(DbError::connection("connection closed")),
            }
        };
        callback(settled);
    }

    fn open_transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>, DbError> {
        match &*self.lifecycle.lock() {
            Lifecycle::Open => {}
            Lifecycle::Pending(_) => return Err(DbError::connection("connection not open")),
            Lifecycle::Failed(err) => return Err(err.clone()),
            Lifecycle::Closed => return Err(DbError::connection("connection closed")),
        }
        for store in stores {
            self.schema.require_store(store)?;
        }
        let working = self.data.read().clone();
        debug!(database = %self.name, ?stores, ?mode, "memory transaction opened");
        Ok(Box::new(MemoryTransaction {
            mode,
            stores: stores.to_vec(),
            schema: self.schema.clone(),
            working,
            shared: self.data.clone(),
            dirty: false,
        }))
    }

    fn close(&self) {
        let waiting = match mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed) {
            Lifecycle::Pending(callbacks) => callbacks,
            _ => Vec::new(),
        };
        for callback in waiting {
            callback(Err(DbError::connection("connection closed")));
        }
    }
}

/// Always-available factory for [`MemoryBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFactory;

impl BackendFactory for MemoryFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn create(&self, name: &str, schema: &DatabaseSchema) -> Result<Arc<dyn Backend>, DbError> {
        Ok(Arc::new(MemoryBackend::new(name, schema.clone())))
    }
}

struct MemoryTransaction {
    mode: TransactionMode,
    stores: Vec<String>,
    schema: Arc<DatabaseSchema>,
    working: Snapshot,
    shared: Arc<RwLock<Snapshot>>,
    dirty: bool,
}

/// Keys an index holds for `record`: one per distinct array element for
/// multi-entry indexes, else the field value itself when it is a valid key.
fn index_keys(index: &IndexSchema, record: &Record) -> Vec<Value> {
    let Some(value) = record.get_path(&index.key_path) else {
        return Vec::new();
    };
    match value {
        Value::Array(items) if index.multi_entry => {
            let mut keys: Vec<Value> = items.iter().filter(|v| v.is_key()).cloned().collect();
            keys.sort();
            keys.dedup();
            keys
        }
        v if v.is_key() => vec![v.clone()],
        _ => Vec::new(),
    }
}

fn is_degenerate(range: &KeyRange) -> bool {
    !range.is_prefix_range()
        && (range.lower_open() || range.upper_open())
        && matches!((range.lower(), range.upper()), (Some(l), Some(u)) if l == u)
}

impl MemoryTransaction {
    fn scoped(&self, store: &str) -> Result<(&StoreSchema, &StoreData), DbError> {
        if !self.covers(store) {
            return Err(DbError::Argument(format!(
                "store '{store}' is not part of this transaction"
            )));
        }
        let schema = self.schema.require_store(store)?;
        let data = self
            .working
            .stores
            .get(store)
            .ok_or_else(|| DbError::store_not_found(store))?;
        Ok((schema, data))
    }

    fn writable(&self, store: &str) -> Result<(), DbError> {
        self.scoped(store)?;
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(DbError::ReadOnly {
                store: store.to_string(),
            })
        }
    }

    fn resolve_key(
        schema: &StoreSchema,
        data: &mut StoreData,
        record: &mut Record,
        key: Option<Value>,
    ) -> Result<Value, DbError> {
        let key = match &schema.key_path {
            Some(path) => match record.get_path(path) {
                Some(inline) => inline.clone(),
                None if schema.auto_increment => {
                    let generated = Value::Integer(data.next_key);
                    record.set_field(path, generated.clone());
                    generated
                }
                None => {
                    return Err(DbError::Argument(format!(
                        "record has no key at '{path}' in store '{}'",
                        schema.name
                    )));
                }
            },
            None => match key {
                Some(key) => key,
                None if schema.auto_increment => Value::Integer(data.next_key),
                None => {
                    return Err(DbError::Argument(format!(
                        "store '{}' needs an explicit key",
                        schema.name
                    )));
                }
            },
        };
        if !key.is_key() {
            return Err(DbError::Argument(format!("{key:?} is not a valid key")));
        }
        if let Value::Integer(n) = key
            && n >= data.next_key
        {
            data.next_key = n.saturating_add(1);
        }
        Ok(key)
    }

    fn unindex(schema: &StoreSchema, data: &mut StoreData, key: &Value) {
        let Some(old) = data.records.get(key).cloned() else {
            return;
        };
        for index in &schema.indexes {
            let Some(entries) = data.indexes.get_mut(&index.name) else {
                continue;
            };
            for index_key in index_keys(index, &old) {
                let emptied = match entries.get_mut(&index_key) {
                    Some(pks) => {
                        pks.remove(key);
                        pks.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    entries.remove(&index_key);
                }
            }
        }
    }
}

impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn store_names(&self) -> &[String] {
        &self.stores
    }

    fn open_cursor(&self, request: &CursorRequest<'_>) -> Result<Box<dyn Cursor + '_>, DbError> {
        let (schema, data) = self.scoped(request.store)?;
        let range = request.range.filter(|r| !is_degenerate(r));
        let degenerate = request.range.is_some() && range.is_none();
        let mut entries = Vec::new();
        if !degenerate {
            let bounds = range
                .map(KeyRange::to_bounds)
                .unwrap_or((Bound::Unbounded, Bound::Unbounded));
            let accept = |key: &Value| range.is_none_or(|r| r.contains(key));
            match request.index {
                Some(index) => {
                    schema.require_index(index)?;
                    let empty = OrdMap::new();
                    let index_data = data.indexes.get(index).unwrap_or(&empty);
                    for (key, pks) in index_data.range(bounds).filter(|(k, _)| accept(*k)) {
                        for pk in pks {
                            let value = data.records.get(pk).cloned().unwrap_or(Value::Null);
                            entries.push(CursorEntry {
                                key: key.clone(),
                                primary_key: pk.clone(),
                                value,
                            });
                        }
                    }
                }
                None => {
                    for (pk, record) in data.records.range(bounds).filter(|(k, _)| accept(*k)) {
                        entries.push(CursorEntry {
                            key: pk.clone(),
                            primary_key: pk.clone(),
                            value: record.clone(),
                        });
                    }
                }
            }
        }
        Ok(Box::new(EntryCursor::new(entries, request.direction)))
    }

    fn get(&self, store: &str, key: &Value) -> Result<Option<Record>, DbError> {
        let (_, data) = self.scoped(store)?;
        Ok(data.records.get(key).cloned())
    }

    fn put(
        &mut self,
        store: &str,
        mut record: Record,
        key: Option<Value>,
    ) -> Result<Value, DbError> {
        self.writable(store)?;
        let schema = self.schema.require_store(store)?.clone();
        let data = self
            .working
            .stores
            .get_mut(store)
            .ok_or_else(|| DbError::store_not_found(store))?;
        let key = Self::resolve_key(&schema, data, &mut record, key)?;

        for index in schema.indexes.iter().filter(|i| i.unique) {
            let Some(entries) = data.indexes.get(&index.name) else {
                continue;
            };
            for index_key in index_keys(index, &record) {
                if entries
                    .get(&index_key)
                    .is_some_and(|pks| pks.iter().any(|pk| *pk != key))
                {
                    return Err(DbError::Constraint(format!(
                        "unique index '{}' already holds {index_key:?}",
                        index.name
                    )));
                }
            }
        }

        Self::unindex(&schema, data, &key);
        for index in &schema.indexes {
            let entries = data
                .indexes
                .entry(index.name.clone())
                .or_insert_with(OrdMap::new);
            for index_key in index_keys(index, &record) {
                entries
                    .entry(index_key)
                    .or_insert_with(OrdSet::new)
                    .insert(key.clone());
            }
        }
        data.records.insert(key.clone(), record);
        self.dirty = true;
        Ok(key)
    }

    fn delete(&mut self, store: &str, key: &Value) -> Result<bool, DbError> {
        self.writable(store)?;
        let schema = self.schema.require_store(store)?.clone();
        let Some(data) = self.working.stores.get_mut(store) else {
            return Err(DbError::store_not_found(store));
        };
        Self::unindex(&schema, data, key);
        let removed = data.records.remove(key).is_some();
        self.dirty |= removed;
        Ok(removed)
    }

    fn clear(&mut self, store: &str) -> Result<(), DbError> {
        self.writable(store)?;
        let Some(data) = self.working.stores.get_mut(store) else {
            return Err(DbError::store_not_found(store));
        };
        data.records = OrdMap::new();
        data.indexes = data
            .indexes
            .keys()
            .map(|name| (name.clone(), OrdMap::new()))
            .collect();
        self.dirty = true;
        Ok(())
    }

    fn count(&self, store: &str, range: Option<&KeyRange>) -> Result<usize, DbError> {
        let (_, data) = self.scoped(store)?;
        Ok(match range {
            Some(range) => data.records.keys().filter(|k| range.contains(k)).count(),
            None => data.records.len(),
        })
    }

    /// Publishes the working copy of each scoped store. Overlapping
    /// read-write transactions must not run concurrently; `Storage` queues
    /// them.
    fn commit(self: Box<Self>) -> Result<(), DbError> {
        if !self.dirty {
            return Ok(());
        }
        let mut shared = self.shared.write();
        for store in &self.stores {
            if let Some(data) = self.working.stores.get(store) {
                shared.stores.insert(store.clone(), data.clone());
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {
        if self.dirty {
            warn!(stores = ?self.stores, "memory transaction aborted, staged writes discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryBackend, MemoryFactory};
    use crate::catalog::schema::{DatabaseSchema, IndexSchema, StoreSchema};
    use crate::catalog::types::Value;
    use crate::error::{DbError, DbErrorCode};
    use crate::storage::backend::{Backend, BackendFactory, CursorRequest, TransactionMode};
    use crate::storage::cursor::{Cursor, Direction};
    use crate::storage::key_range::KeyRange;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new(vec![
            StoreSchema::new("st", Some("id"))
                .with_index(IndexSchema::new("value"))
                .with_index(IndexSchema::new("tag").multi_entry()),
            StoreSchema::new("auto", None).auto_increment(),
        ])
    }

    fn stores(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn seed(backend: &MemoryBackend) {
        let mut tx = backend
            .open_transaction(&stores(&["st"]), TransactionMode::ReadWrite)
            .expect("tx");
        for (id, value, tags) in [("a", 3, vec!["x"]), ("b", 1, vec!["x", "y"]), ("c", 2, vec![])] {
            tx.put("st", Value::from(json!({"id": id, "value": value, "tag": tags})), None)
                .expect("put");
        }
        tx.commit().expect("commit");
    }

    fn primary_keys(cursor: &mut dyn Cursor) -> Vec<Value> {
        let mut out = Vec::new();
        while !cursor.is_done() {
            out.push(cursor.primary_key().cloned().unwrap_or(Value::Null));
            cursor.advance().expect("advance");
        }
        out
    }

    #[test]
    fn index_cursor_follows_index_key_order() {
        let backend = MemoryBackend::new("db", schema());
        seed(&backend);
        let tx = backend
            .open_transaction(&stores(&["st"]), TransactionMode::ReadOnly)
            .expect("tx");
        let mut cursor = tx
            .open_cursor(&CursorRequest {
                store: "st",
                index: Some("value"),
                range: None,
                direction: Direction::Next,
            })
            .expect("cursor");
        assert_eq!(
            primary_keys(cursor.as_mut()),
            vec![Value::text("b"), Value::text("c"), Value::text("a")]
        );
    }

    #[test]
    fn multi_entry_index_yields_one_entry_per_element() {
        let backend = MemoryBackend::new("db", schema());
        seed(&backend);
        let tx = backend
            .open_transaction(&stores(&["st"]), TransactionMode::ReadOnly)
            .expect("tx");
        let range = KeyRange::only(Value::text("x")).expect("range");
        let mut cursor = tx
            .open_cursor(&CursorRequest {
                store: "st",
                index: Some("tag"),
                range: Some(&range),
                direction: Direction::Next,
            })
            .expect("cursor");
        assert_eq!(primary_keys(cursor.as_mut()), vec![Value::text("a"), Value::text("b")]);
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let backend = MemoryBackend::new("db", schema());
        let mut tx = backend
            .open_transaction(&stores(&["st"]), TransactionMode::ReadOnly)
            .expect("tx");
        let err = tx
            .put("st", Value::from(json!({"id": "z"})), None)
            .expect_err("read only");
        assert_eq!(err.code(), DbErrorCode::ReadOnly);
    }

    #[test]
    fn writes_are_invisible_until_commit_and_dropped_on_abort() {
        let backend = MemoryBackend::new("db", schema());
        let mut tx = backend
            .open_transaction(&stores(&["auto"]), TransactionMode::ReadWrite)
            .expect("tx");
        let first = tx.put("auto", Value::text("one"), None).expect("put");
        let second = tx.put("auto", Value::text("two"), None).expect("put");
        assert_eq!((first, second), (Value::Integer(1), Value::Integer(2)));

        let reader = backend
            .open_transaction(&stores(&["auto"]), TransactionMode::ReadOnly)
            .expect("reader");
        assert_eq!(reader.count("auto", None).expect("count"), 0);
        tx.abort();

        let reader = backend
            .open_transaction(&stores(&["auto"]), TransactionMode::ReadOnly)
            .expect("reader");
        assert_eq!(reader.count("auto", None).expect("count"), 0);
    }

    #[test]
    fn degenerate_open_range_is_empty() {
        let backend = MemoryBackend::new("db", schema());
        seed(&backend);
        let tx = backend
            .open_transaction(&stores(&["st"]), TransactionMode::ReadOnly)
            .expect("tx");
        let range = KeyRange::bounded(Some(Value::text("a")), Some(Value::text("a")), true, false)
            .expect("range");
        let cursor = tx
            .open_cursor(&CursorRequest {
                store: "st",
                index: None,
                range: Some(&range),
                direction: Direction::Next,
            })
            .expect("cursor");
        assert!(cursor.is_done());
    }

    #[test]
    fn deferred_backend_notifies_waiters_once_settled() {
        let (backend, handle) = MemoryBackend::deferred("db", schema());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        backend.on_ready(Box::new(move |result| sink.lock().push(result.is_ok())));
        assert!(!backend.is_ready());
        assert!(backend
            .open_transaction(&stores(&["st"]), TransactionMode::ReadOnly)
            .is_err());

        handle.fail(DbError::connection("boom"));
        assert_eq!(*seen.lock(), vec![false]);
        assert!(!backend.is_ready());
    }

    #[test]
    fn factory_creates_ready_backend() {
        let backend = MemoryFactory.create("db", &schema()).expect("backend");
        assert!(backend.is_ready());
        let err = backend
            .open_transaction(&stores(&["missing"]), TransactionMode::ReadOnly)
            .err()
            .expect("unknown store");
        assert_eq!(err.code(), DbErrorCode::StoreNotFound);
    }
}
