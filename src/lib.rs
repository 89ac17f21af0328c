pub mod catalog;
pub mod config;
pub mod error;
pub mod query;
pub mod scan;
pub mod storage;
pub mod streamer;
pub mod txn;

use crate::catalog::schema::DatabaseSchema;
use crate::catalog::types::{Record, Value};
use crate::config::{BackendKind, StorageConfig};
use crate::error::DbError;
use crate::query::compiler::{CompileTarget, CompiledPlan, QueryResult, compile};
use crate::query::plan::Query;
use crate::scan::directive::{Directive, Tuple};
use crate::scan::engine::{self, Position};
use crate::scan::iterator::IteratorSpec;
use crate::storage::backend::{
    Backend, BackendFactory, Transaction, TransactionMode, select_backend,
};
use crate::storage::key_range::KeyRange;
use crate::streamer::Streamer;
use crate::txn::request::Request;
use crate::txn::scheduler::{Admission, Phase, TransactionScheduler};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub use crate::catalog::{IndexSchema, StoreSchema};
pub use crate::error::DbErrorCode;
pub use crate::storage::cursor::Direction;

type Work = Box<dyn FnOnce(&mut dyn Transaction) -> Result<(), DbError> + Send>;
type OnComplete = Box<dyn FnOnce(Result<(), DbError>) + Send>;

struct PendingTransaction {
    stores: Vec<String>,
    mode: TransactionMode,
    work: Work,
    on_complete: OnComplete,
}

struct StorageInner {
    name: String,
    schema: DatabaseSchema,
    config: StorageConfig,
    scheduler: Mutex<TransactionScheduler<PendingTransaction>>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
}

/// Connection handle: owns the schema, the selected backend and the
/// transaction scheduler every read and write goes through.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl StorageInner {
    /// Runs `next` and every queued request its completion releases.
    fn dispatch(&self, mut next: Option<PendingTransaction>) {
        while let Some(request) = next.take() {
            let mode = request.mode;
            let stores = request.stores.clone();
            self.execute(request);
            next = self.scheduler.lock().complete(mode, &stores);
        }
    }

    fn execute(&self, request: PendingTransaction) {
        let PendingTransaction {
            stores,
            mode,
            work,
            on_complete,
        } = request;
        let backend = self.backend.read().clone();
        let result = match backend {
            Some(backend) => match backend.open_transaction(&stores, mode) {
                Ok(mut tx) => match work(tx.as_mut()) {
                    Ok(()) => tx.commit(),
                    Err(err) => {
                        tx.abort();
                        Err(err)
                    }
                },
                Err(err) => Err(err),
            },
            None => Err(DbError::connection("no storage backend connected")),
        };
        if let Err(err) = &result {
            debug!(database = %self.name, ?stores, error = %err, "transaction failed");
        }
        on_complete(result);
    }

    fn on_ready(&self, result: Result<(), DbError>) {
        match result {
            Ok(()) => {
                let next = self.scheduler.lock().mark_ready();
                self.dispatch(next);
            }
            Err(err) => {
                warn!(database = %self.name, error = %err, "storage connection failed");
                let purged = self.scheduler.lock().fail(err.clone());
                for request in purged {
                    (request.on_complete)(Err(err.clone()));
                }
            }
        }
    }
}

impl Storage {
    /// A storage handle with no backend yet. Requests queue until
    /// [`Storage::connect`] opens one.
    pub fn new(name: &str, schema: DatabaseSchema, config: StorageConfig) -> Self {
        let scheduler = TransactionScheduler::new(&config);
        Self {
            inner: Arc::new(StorageInner {
                name: name.to_string(),
                schema,
                config,
                scheduler: Mutex::new(scheduler),
                backend: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.inner.schema
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Attaches `backend` and drains the queue once its connection is ready.
    pub fn connect(&self, backend: Arc<dyn Backend>) {
        debug!(database = %self.inner.name, backend = backend.kind().as_str(), "connecting");
        *self.inner.backend.write() = Some(backend.clone());
        self.inner.scheduler.lock().begin_opening();
        let inner = self.inner.clone();
        backend.on_ready(Box::new(move |result| inner.on_ready(result)));
    }

    /// Connects the first supported backend in `config.preference` order.
    pub fn connect_preferred(
        &self,
        factories: &[&dyn BackendFactory],
    ) -> Result<BackendKind, DbError> {
        let selected = select_backend(
            factories,
            &self.inner.config.preference,
            &self.inner.name,
            &self.inner.schema,
        );
        match selected {
            Ok(backend) => {
                let kind = backend.kind();
                self.connect(backend);
                Ok(kind)
            }
            Err(err) => {
                self.inner.on_ready(Err(err.clone()));
                Err(err)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.scheduler.lock().is_ready()
    }

    pub fn phase(&self) -> Phase {
        self.inner.scheduler.lock().phase()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.inner.backend.read().as_ref().map(|b| b.kind())
    }

    /// Rejects queued and future requests with a connection error and closes
    /// the backend.
    pub fn close(&self) {
        let purged = self.inner.scheduler.lock().close();
        for request in purged {
            (request.on_complete)(Err(DbError::connection("connection closed")));
        }
        let backend = self.inner.backend.write().take();
        if let Some(backend) = backend {
            backend.close();
        }
        debug!(database = %self.inner.name, "storage closed");
    }

    fn resolve_stores(&self, stores: &[&str]) -> Result<Vec<String>, DbError> {
        if stores.is_empty() {
            return Err(DbError::Argument("a transaction needs at least one store".into()));
        }
        let mut names = Vec::with_capacity(stores.len());
        for store in stores {
            self.inner.schema.require_store(store)?;
            if !names.iter().any(|n: &String| n.as_str() == *store) {
                names.push(store.to_string());
            }
        }
        Ok(names)
    }

    /// Schedules `work` in a transaction over `stores`. `on_complete` receives
    /// the commit result, or the error that prevented the work from running.
    pub fn transaction<W, C>(
        &self,
        stores: &[&str],
        mode: TransactionMode,
        work: W,
        on_complete: C,
    ) -> Result<(), DbError>
    where
        W: FnOnce(&mut dyn Transaction) -> Result<(), DbError> + Send + 'static,
        C: FnOnce(Result<(), DbError>) + Send + 'static,
    {
        let request = PendingTransaction {
            stores: self.resolve_stores(stores)?,
            mode,
            work: Box::new(work),
            on_complete: Box::new(on_complete),
        };
        let scope = request.stores.clone();
        let admission = self.inner.scheduler.lock().admit(mode, &scope, request);
        match admission {
            Admission::Dispatch(request) => self.inner.dispatch(Some(request)),
            Admission::Queued => {
                debug!(database = %self.inner.name, ?mode, "transaction queued");
            }
            Admission::Rejected(request, err) => (request.on_complete)(Err(err)),
        }
        Ok(())
    }

    /// Runs `f` in a transaction and resolves with its output once committed.
    pub fn run<T, F>(
        &self,
        stores: &[&str],
        mode: TransactionMode,
        f: F,
    ) -> Result<Request<T>, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Transaction) -> Result<T, DbError> + Send + 'static,
    {
        let (completion, request) = Request::channel();
        let output = Arc::new(Mutex::new(None));
        let slot = output.clone();
        self.transaction(
            stores,
            mode,
            move |tx| {
                *slot.lock() = Some(f(tx)?);
                Ok(())
            },
            move |result| {
                let result = result.and_then(|()| {
                    output
                        .lock()
                        .take()
                        .ok_or_else(|| DbError::Aborted("transaction produced no result".into()))
                });
                completion.send(result);
            },
        )?;
        Ok(request)
    }

    fn scan_stores(&self, specs: &[IteratorSpec]) -> Result<Vec<String>, DbError> {
        let mut stores = BTreeSet::new();
        for spec in specs {
            spec.validate(&self.inner.schema)?;
            stores.insert(spec.store().to_string());
        }
        Ok(stores.into_iter().collect())
    }

    fn run_read<T, F>(&self, specs: &[IteratorSpec], f: F) -> Result<Request<T>, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Transaction) -> Result<T, DbError> + Send + 'static,
    {
        if specs.is_empty() {
            return Err(DbError::Argument("scan needs at least one iterator".into()));
        }
        let stores = self.scan_stores(specs)?;
        let names: Vec<&str> = stores.iter().map(String::as_str).collect();
        self.run(&names, self.inner.config.default_mode, f)
    }

    /// Drives `specs` in lock-step inside one transaction over their stores.
    pub fn scan<F>(&self, specs: Vec<IteratorSpec>, on_tuple: F) -> Result<Request<()>, DbError>
    where
        F: FnMut(&Tuple) -> Vec<Directive> + Send + 'static,
    {
        let scanned = specs.clone();
        self.run_read(&scanned, move |tx| engine::scan(tx, &specs, on_tuple))
    }

    /// Calls `on_value` with the effective value of every position.
    pub fn map<F>(&self, spec: IteratorSpec, on_value: F) -> Result<Request<()>, DbError>
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let specs = [spec.clone()];
        self.run_read(&specs, move |tx| engine::map(tx, &spec, on_value))
    }

    /// Folds the effective values of `spec` into `initial`.
    pub fn reduce<A, F>(&self, spec: IteratorSpec, f: F, initial: A) -> Result<Request<A>, DbError>
    where
        A: Send + 'static,
        F: FnMut(A, &Value) -> A + Send + 'static,
    {
        let specs = [spec.clone()];
        self.run_read(&specs, move |tx| engine::reduce(tx, &spec, f, initial))
    }

    /// Hands every cursor position to `on_cursor`, which steers the cursor.
    pub fn open<F>(&self, spec: IteratorSpec, on_cursor: F) -> Result<Request<()>, DbError>
    where
        F: FnMut(Position<'_>) -> Directive + Send + 'static,
    {
        let specs = [spec.clone()];
        self.run_read(&specs, move |tx| engine::open(tx, &spec, on_cursor))
    }

    /// Compiles `query` for the connected backend.
    pub fn compile(&self, query: &Query) -> Result<CompiledPlan, DbError> {
        let target = self
            .backend_kind()
            .map_or(CompileTarget::Native, CompileTarget::for_backend);
        compile(query, &self.inner.schema, target)
    }

    /// Compiles and executes `query`.
    pub fn fetch(&self, query: &Query) -> Result<Request<QueryResult>, DbError> {
        let plan = self.compile(query)?;
        self.execute(plan)
    }

    pub fn execute(&self, plan: CompiledPlan) -> Result<Request<QueryResult>, DbError> {
        match plan {
            CompiledPlan::Native(spec) => {
                let specs = [spec.clone()];
                self.run_read(&specs, move |tx| engine::collect(tx, &spec))
            }
            CompiledPlan::Sql(plan) => {
                let store = plan.store.clone();
                self.run(&[store.as_str()], self.inner.config.default_mode, move |tx| {
                    let rows = tx.execute_sql(&plan.sql, &plan.params)?;
                    plan.shape_rows(&rows)
                })
            }
        }
    }

    /// Stores `record`, resolving with its primary key.
    pub fn put(
        &self,
        store: &str,
        record: Record,
        key: Option<Value>,
    ) -> Result<Request<Value>, DbError> {
        let name = store.to_string();
        self.run(&[store], TransactionMode::ReadWrite, move |tx| {
            tx.put(&name, record, key)
        })
    }

    pub fn get(&self, store: &str, key: Value) -> Result<Request<Option<Record>>, DbError> {
        let name = store.to_string();
        self.run(&[store], TransactionMode::ReadOnly, move |tx| tx.get(&name, &key))
    }

    pub fn delete(&self, store: &str, key: Value) -> Result<Request<bool>, DbError> {
        let name = store.to_string();
        self.run(&[store], TransactionMode::ReadWrite, move |tx| {
            tx.delete(&name, &key)
        })
    }

    pub fn count(&self, store: &str, range: Option<KeyRange>) -> Result<Request<usize>, DbError> {
        let name = store.to_string();
        self.run(&[store], TransactionMode::ReadOnly, move |tx| {
            tx.count(&name, range.as_ref())
        })
    }

    pub fn clear(&self, store: &str) -> Result<Request<()>, DbError> {
        let name = store.to_string();
        self.run(&[store], TransactionMode::ReadWrite, move |tx| tx.clear(&name))
    }

    /// Streamer resolving pushed primary keys of `store`, optionally
    /// projected to one `field`.
    pub fn streamer(&self, store: &str, field: Option<&str>) -> Result<Streamer, DbError> {
        self.inner.schema.require_store(store)?;
        Ok(Streamer::new(self.clone(), store, field))
    }
}
