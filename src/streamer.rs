//! Push/collect correlation buffer over primary-key lookups.

use crate::Storage;
use crate::catalog::types::Value;
use crate::error::DbError;
use crate::storage::backend::TransactionMode;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

type Sink = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;
type Collector = Box<dyn FnOnce(Vec<Option<Value>>) + Send>;

#[derive(Default)]
struct StreamerState {
    /// Bumped every time a batch is delivered; late lookups of an earlier
    /// batch still reach the sink but no longer touch the current batch.
    generation: u64,
    results: Vec<Option<Value>>,
    /// Unsettled pushes of the current batch.
    outstanding: usize,
    /// Unsettled pushes per key, across batches.
    pending: BTreeMap<Value, usize>,
    sink: Option<Sink>,
    collectors: Vec<Collector>,
}

impl StreamerState {
    fn take_batch(&mut self) -> (Vec<Collector>, Vec<Option<Value>>) {
        self.generation += 1;
        self.outstanding = 0;
        (
            std::mem::take(&mut self.collectors),
            std::mem::take(&mut self.results),
        )
    }
}

fn deliver(collectors: Vec<Collector>, batch: Vec<Option<Value>>) {
    let mut collectors = collectors.into_iter().peekable();
    while let Some(collector) = collectors.next() {
        if collectors.peek().is_some() {
            collector(batch.clone());
        } else {
            collector(batch);
            break;
        }
    }
}

/// Resolves pushed primary keys of one store.
///
/// Each push runs its own read transaction, so results settle in completion
/// order. A sink sees every result as it settles; a collector receives the
/// whole batch in push order once nothing is outstanding.
#[derive(Clone)]
pub struct Streamer {
    storage: Storage,
    store: String,
    field: Option<String>,
    state: Arc<Mutex<StreamerState>>,
}

impl Streamer {
    pub(crate) fn new(storage: Storage, store: &str, field: Option<&str>) -> Self {
        Self {
            storage,
            store: store.to_string(),
            field: field.map(str::to_string),
            state: Arc::new(Mutex::new(StreamerState::default())),
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Pushes of the current batch that have not settled.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    pub fn is_pending(&self, key: &Value) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    /// Called with every key and its value (or `None`) as lookups settle.
    pub fn set_sink<F>(&self, sink: F)
    where
        F: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        self.state.lock().sink = Some(Arc::new(sink));
    }

    /// Delivers the current batch in push order once every push settled,
    /// immediately when nothing is outstanding.
    pub fn collect<F>(&self, collector: F)
    where
        F: FnOnce(Vec<Option<Value>>) + Send + 'static,
    {
        let ready = {
            let mut state = self.state.lock();
            state.collectors.push(Box::new(collector));
            (state.outstanding == 0).then(|| state.take_batch())
        };
        if let Some((collectors, batch)) = ready {
            deliver(collectors, batch);
        }
    }

    /// Delivers waiting collectors now. Unsettled pushes are reported as
    /// `None` and counted in the returned [`DbError::Unresolved`].
    pub fn flush(&self) -> Result<(), DbError> {
        let (unresolved, collectors, batch) = {
            let mut state = self.state.lock();
            let unresolved = state.outstanding;
            let (collectors, batch) = state.take_batch();
            (unresolved, collectors, batch)
        };
        deliver(collectors, batch);
        if unresolved > 0 {
            warn!(store = %self.store, unresolved, "streamer flushed with unresolved keys");
            return Err(DbError::Unresolved {
                pending: unresolved,
            });
        }
        Ok(())
    }

    /// Schedules a lookup of `key`.
    pub fn push(&self, key: Value) -> Result<(), DbError> {
        let slot = {
            let mut state = self.state.lock();
            state.results.push(None);
            state.outstanding += 1;
            *state.pending.entry(key.clone()).or_insert(0) += 1;
            (state.generation, state.results.len() - 1)
        };

        let found = Arc::new(Mutex::new(None));
        let write_slot = found.clone();
        let store = self.store.clone();
        let field = self.field.clone();
        let lookup = key.clone();
        let state = self.state.clone();
        let settle_key = key.clone();
        let log_store = self.store.clone();

        let scheduled = self.storage.transaction(
            &[self.store.as_str()],
            TransactionMode::ReadOnly,
            move |tx| {
                let record = tx.get(&store, &lookup)?;
                *write_slot.lock() = match (record, field.as_deref()) {
                    (Some(record), Some(field)) => record.get_path(field).cloned(),
                    (record, None) => record,
                    (None, Some(_)) => None,
                };
                Ok(())
            },
            move |result| {
                let value = match result {
                    Ok(()) => found.lock().take(),
                    Err(err) => {
                        warn!(
                            store = %log_store,
                            key = ?settle_key,
                            error = %err,
                            "streamer lookup failed"
                        );
                        None
                    }
                };
                settle(&state, slot, &settle_key, value);
            },
        );
        if let Err(err) = scheduled {
            settle(&self.state, slot, &key, None);
            return Err(err);
        }
        Ok(())
    }
}

fn settle(state: &Mutex<StreamerState>, slot: (u64, usize), key: &Value, value: Option<Value>) {
    let (generation, idx) = slot;
    let (sink, ready) = {
        let mut state = state.lock();
        let remaining = match state.pending.get_mut(key) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            state.pending.remove(key);
        }
        let mut ready = None;
        if state.generation == generation {
            if let Some(result) = state.results.get_mut(idx) {
                *result = value.clone();
            }
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.outstanding == 0 && !state.collectors.is_empty() {
                ready = Some(state.take_batch());
            }
        } else {
            debug!(?key, "late streamer result outside the current batch");
        }
        (state.sink.clone(), ready)
    };
    if let Some(sink) = sink {
        sink(key, value.as_ref());
    }
    if let Some((collectors, batch)) = ready {
        deliver(collectors, batch);
    }
}
