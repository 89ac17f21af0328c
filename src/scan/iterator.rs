use crate::catalog::schema::DatabaseSchema;
use crate::catalog::types::Value;
use crate::error::DbError;
use crate::query::aggregate::Aggregate;
use crate::query::predicate::{Predicate, Projection};
use crate::storage::cursor::Direction;
use crate::storage::key_range::KeyRange;
use parking_lot::Mutex;
use std::sync::Arc;

/// What a scan slot reports for each position.
///
/// | kind       | tuple key   | tuple value | effective value |
/// |------------|-------------|-------------|-----------------|
/// | Key        | primary key | primary key | primary key     |
/// | Value      | primary key | record      | record          |
/// | IndexKey   | index key   | primary key | index key       |
/// | IndexValue | index key   | record      | primary key     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterKind {
    Key,
    Value,
    IndexKey,
    IndexValue,
}

impl IterKind {
    pub fn is_index(self) -> bool {
        matches!(self, IterKind::IndexKey | IterKind::IndexValue)
    }

    /// Whether positions carry the stored record.
    pub fn reads_records(self) -> bool {
        matches!(self, IterKind::Value | IterKind::IndexValue)
    }
}

/// Position state shared by every clone of an [`IteratorSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorState {
    pub primary_key: Option<Value>,
    pub index_key: Option<Value>,
    /// Records delivered since the last reset.
    pub visited: usize,
    /// The cursor ran past its last entry.
    pub done: bool,
}

impl CursorState {
    /// Last delivered position as (effective cursor key, primary key).
    pub fn position(&self, kind: IterKind) -> Option<(&Value, &Value)> {
        let pk = self.primary_key.as_ref()?;
        if kind.is_index() {
            Some((self.index_key.as_ref()?, pk))
        } else {
            Some((pk, pk))
        }
    }
}

/// Backend-agnostic description of one ordered scan.
///
/// Cloning keeps the position state shared, so the clone handed to a scan
/// resumes where an earlier scan of the original stopped. Use
/// [`IteratorSpec::fork`] for an independent copy.
#[derive(Debug, Clone)]
pub struct IteratorSpec {
    store: String,
    index: Option<String>,
    kind: IterKind,
    direction: Direction,
    range: Option<KeyRange>,
    filter: Option<Predicate>,
    map: Option<Projection>,
    reduce: Option<Aggregate>,
    offset: usize,
    limit: Option<usize>,
    state: Arc<Mutex<CursorState>>,
}

impl IteratorSpec {
    fn new(store: &str, index: Option<&str>, kind: IterKind) -> Self {
        Self {
            store: store.to_string(),
            index: index.map(str::to_string),
            kind,
            direction: Direction::Next,
            range: None,
            filter: None,
            map: None,
            reduce: None,
            offset: 0,
            limit: None,
            state: Arc::new(Mutex::new(CursorState::default())),
        }
    }

    /// Primary keys of `store`.
    pub fn keys(store: &str) -> Self {
        Self::new(store, None, IterKind::Key)
    }

    /// Records of `store` in primary key order.
    pub fn values(store: &str) -> Self {
        Self::new(store, None, IterKind::Value)
    }

    /// Index keys of `index`, paired with primary keys.
    pub fn index_keys(store: &str, index: &str) -> Self {
        Self::new(store, Some(index), IterKind::IndexKey)
    }

    /// Records of `store` in `index` order.
    pub fn index_values(store: &str, index: &str) -> Self {
        Self::new(store, Some(index), IterKind::IndexValue)
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn reverse(self) -> Self {
        let direction = self.direction.with_reverse(true);
        self.with_direction(direction)
    }

    pub fn unique(self) -> Self {
        let direction = self.direction.with_unique(true);
        self.with_direction(direction)
    }

    pub fn with_range(mut self, range: KeyRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_map(mut self, map: Projection) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_reduce(mut self, reduce: Aggregate) -> Self {
        self.reduce = Some(reduce);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn kind(&self) -> IterKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn range(&self) -> Option<&KeyRange> {
        self.range.as_ref()
    }

    pub fn filter(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    pub fn map(&self) -> Option<&Projection> {
        self.map.as_ref()
    }

    pub fn reduce(&self) -> Option<&Aggregate> {
        self.reduce.as_ref()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Snapshot of the shared position state.
    pub fn state(&self) -> CursorState {
        self.state.lock().clone()
    }

    pub fn reset(&self) {
        *self.state.lock() = CursorState::default();
    }

    /// Same description with fresh, unshared position state.
    pub fn fork(&self) -> Self {
        Self {
            state: Arc::new(Mutex::new(CursorState::default())),
            ..self.clone()
        }
    }

    pub(crate) fn record_position(&self, key: &Value, primary_key: &Value) {
        let mut state = self.state.lock();
        state.primary_key = Some(primary_key.clone());
        state.index_key = self.kind.is_index().then(|| key.clone());
        state.visited += 1;
    }

    pub(crate) fn mark_done(&self) {
        self.state.lock().done = true;
    }

    pub fn validate(&self, schema: &DatabaseSchema) -> Result<(), DbError> {
        let store = schema.require_store(&self.store)?;
        if let Some(index) = &self.index {
            store.require_index(index)?;
        }
        if let Some(filter) = &self.filter {
            filter.validate_depth()?;
        }
        Ok(())
    }

    pub fn tuple_key(&self, key: &Value) -> Value {
        key.clone()
    }

    pub fn tuple_value(&self, primary_key: &Value, record: &Value) -> Value {
        if self.kind.reads_records() {
            record.clone()
        } else {
            primary_key.clone()
        }
    }

    /// The value `map` and `reduce` callbacks receive.
    pub fn effective_value(&self, key: &Value, primary_key: &Value, record: &Value) -> Value {
        match self.kind {
            IterKind::Key | IterKind::IndexValue => primary_key.clone(),
            IterKind::Value => record.clone(),
            IterKind::IndexKey => key.clone(),
        }
    }

    /// The value filter, projection and aggregate trees are evaluated
    /// against: the record when the kind reads records, else the effective value.
    pub fn subject<'a>(
        &self,
        key: &'a Value,
        primary_key: &'a Value,
        record: &'a Value,
    ) -> &'a Value {
        match self.kind {
            IterKind::Value | IterKind::IndexValue => record,
            IterKind::Key => primary_key,
            IterKind::IndexKey => key,
        }
    }
}
