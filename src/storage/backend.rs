use crate::catalog::schema::DatabaseSchema;
use crate::catalog::types::{Record, Row, Value};
use crate::config::BackendKind;
use crate::error::DbError;
use crate::storage::cursor::{Cursor, Direction};
use crate::storage::key_range::KeyRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionMode {
    #[default]
    ReadOnly,
    ReadWrite,
    /// May alter store structure; mutually exclusive with every other transaction.
    VersionChange,
}

impl TransactionMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

/// One-shot connection lifecycle notification.
pub type ReadyCallback = Box<dyn FnOnce(Result<(), DbError>) + Send>;

#[derive(Debug, Clone, Copy)]
pub struct CursorRequest<'a> {
    pub store: &'a str,
    pub index: Option<&'a str>,
    pub range: Option<&'a KeyRange>,
    pub direction: Direction,
}

/// A storage mechanism able to hand out transactions once its connection is ready.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn is_ready(&self) -> bool;
    /// Invokes `callback` once the connection opened or failed. Backends that
    /// are already settled invoke it before returning.
    fn on_ready(&self, callback: ReadyCallback);
    fn open_transaction(
        &self,
        stores: &[String],
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>, DbError>;
    fn close(&self);
}

/// A transaction handle lent to work closures for the duration of one request.
pub trait Transaction {
    fn mode(&self) -> TransactionMode;
    fn store_names(&self) -> &[String];

    fn open_cursor(&self, request: &CursorRequest<'_>) -> Result<Box<dyn Cursor + '_>, DbError>;

    fn execute_sql(&self, _sql: &str, _params: &[Value]) -> Result<RowSet, DbError> {
        Err(DbError::NotImplemented(
            "backend does not execute SQL".to_string(),
        ))
    }

    fn get(&self, store: &str, key: &Value) -> Result<Option<Record>, DbError>;
    /// Stores `record`, returning its primary key.
    fn put(&mut self, store: &str, record: Record, key: Option<Value>) -> Result<Value, DbError>;
    fn delete(&mut self, store: &str, key: &Value) -> Result<bool, DbError>;
    fn clear(&mut self, store: &str) -> Result<(), DbError>;
    fn count(&self, store: &str, range: Option<&KeyRange>) -> Result<usize, DbError>;

    fn commit(self: Box<Self>) -> Result<(), DbError>;
    fn abort(self: Box<Self>);

    fn covers(&self, store: &str) -> bool {
        self.store_names().iter().any(|s| s == store)
    }
}

/// Result of a relational query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Column holding a JSON-encoded record in relational stores.
pub const RECORD_COLUMN: &str = "_default_";

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rebuilds the record of a row: the decoded record column when present,
    /// otherwise an object of all columns.
    pub fn record(&self, row: &Row) -> Result<Record, DbError> {
        if let Some(idx) = self.column_index(RECORD_COLUMN)
            && let Some(Value::Text(json)) = row.values.get(idx)
        {
            let decoded: serde_json::Value = serde_json::from_str(json)
                .map_err(|e| DbError::Backend(format!("invalid record json: {e}")))?;
            return Ok(Value::from(decoded));
        }
        let fields: BTreeMap<String, Value> = self
            .columns
            .iter()
            .cloned()
            .zip(row.values.iter().cloned())
            .collect();
        Ok(Value::Object(fields))
    }

    /// First column of the first row, used for aggregate statements.
    pub fn first_value(&self) -> Value {
        self.rows
            .first()
            .and_then(|row| row.values.first())
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Produces a backend when its capability is available at startup.
pub trait BackendFactory {
    fn kind(&self) -> BackendKind;
    fn is_supported(&self) -> bool;
    fn create(&self, name: &str, schema: &DatabaseSchema) -> Result<Arc<dyn Backend>, DbError>;
}

/// Creates the first supported backend following `preference`.
pub fn select_backend(
    factories: &[&dyn BackendFactory],
    preference: &[BackendKind],
    name: &str,
    schema: &DatabaseSchema,
) -> Result<Arc<dyn Backend>, DbError> {
    for kind in preference {
        let Some(factory) = factories.iter().find(|f| f.kind() == *kind) else {
            continue;
        };
        if factory.is_supported() {
            debug!(backend = kind.as_str(), database = name, "selected storage backend");
            return factory.create(name, schema);
        }
    }
    Err(DbError::Constraint("no storage mechanism found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{RECORD_COLUMN, RowSet};
    use crate::catalog::types::{Row, Value};

    #[test]
    fn record_column_is_decoded_from_json() {
        let rows = RowSet::new(
            vec!["id".into(), RECORD_COLUMN.into()],
            vec![Row::from_values(vec![
                Value::text("a"),
                Value::text(r#"{"id":"a","value":3}"#),
            ])],
        );
        let record = rows.record(&rows.rows[0]).expect("record");
        assert_eq!(record.get_path("value"), Some(&Value::Integer(3)));
    }

    #[test]
    fn plain_columns_become_an_object() {
        let rows = RowSet::new(
            vec!["id".into(), "x".into()],
            vec![Row::from_values(vec![Value::text("a"), Value::Integer(2)])],
        );
        let record = rows.record(&rows.rows[0]).expect("record");
        assert_eq!(record.get_path("x"), Some(&Value::Integer(2)));
        assert_eq!(rows.first_value(), Value::text("a"));
    }
}
