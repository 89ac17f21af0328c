//! Cursor support for backends that only answer SQL.

use crate::catalog::schema::StoreSchema;
use crate::catalog::types::Value;
use crate::error::DbError;
use crate::query::sql::{ROWID_COLUMN, cursor_sql, key_column};
use crate::storage::backend::{CursorRequest, RowSet, Transaction};
use crate::storage::cursor::{CursorEntry, Direction, EntryCursor};
use tracing::trace;

fn column_value(rows: &RowSet, row_idx: usize, record: &Value, column: &str) -> Option<Value> {
    if let Some(value) = record.get_path(column) {
        return Some(value.clone());
    }
    let idx = rows.column_index(column)?;
    rows.rows.get(row_idx)?.values.get(idx).cloned()
}

/// Turns the rows of a cursor statement into cursor entries sorted by
/// (key, primary key). Rows without a usable key are skipped.
pub fn rows_to_entries(
    rows: &RowSet,
    store: &StoreSchema,
    index: Option<&str>,
) -> Result<Vec<CursorEntry>, DbError> {
    let key_col = key_column(store, index)?;
    let pk_col = store.order_column().unwrap_or(ROWID_COLUMN);
    let multi_entry = index
        .and_then(|name| store.index(name))
        .is_some_and(|idx| idx.multi_entry);

    let mut entries = Vec::with_capacity(rows.len());
    for (row_idx, row) in rows.rows.iter().enumerate() {
        let record = rows.record(row)?;
        let Some(primary_key) = column_value(rows, row_idx, &record, pk_col) else {
            continue;
        };
        let keys = match column_value(rows, row_idx, &record, key_col) {
            Some(Value::Array(items)) if multi_entry => items,
            Some(key) => vec![key],
            None => continue,
        };
        for key in keys.into_iter().filter(Value::is_key) {
            entries.push(CursorEntry {
                key,
                primary_key: primary_key.clone(),
                value: record.clone(),
            });
        }
    }
    entries.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then_with(|| a.primary_key.cmp(&b.primary_key))
    });
    entries.dedup_by(|later, first| {
        later.key == first.key && later.primary_key == first.primary_key
    });
    Ok(entries)
}

/// Opens a cursor by executing the statement that reads `request`'s entries.
///
/// Relational transactions call this from their `open_cursor`. Direction and
/// uniqueness are applied on the materialized rows, so the statement is
/// issued in ascending order without `DISTINCT`.
pub fn open_sql_cursor(
    tx: &dyn Transaction,
    store: &StoreSchema,
    request: &CursorRequest<'_>,
) -> Result<EntryCursor, DbError> {
    let (sql, params) = cursor_sql(
        store,
        request.index,
        request.range,
        Direction::Next,
        None,
        0,
    )?;
    trace!(store = %store.name, %sql, "opening sql cursor");
    let rows = tx.execute_sql(&sql, &params)?;
    let entries = rows_to_entries(&rows, store, request.index)?;
    Ok(EntryCursor::new(entries, request.direction))
}

#[cfg(test)]
mod tests {
    use super::rows_to_entries;
    use crate::catalog::schema::{IndexSchema, StoreSchema};
    use crate::catalog::types::{Row, Value};
    use crate::storage::backend::{RECORD_COLUMN, RowSet};

    fn rows() -> RowSet {
        let json = |id: &str, tags: &str| Value::text(&format!(r#"{{"id":"{id}","tag":{tags}}}"#));
        RowSet::new(
            vec!["id".into(), RECORD_COLUMN.into()],
            vec![
                Row::from_values(vec![Value::text("b"), json("b", r#"["x","y"]"#)]),
                Row::from_values(vec![Value::text("a"), json("a", r#"["y"]"#)]),
            ],
        )
    }

    #[test]
    fn primary_entries_are_sorted_by_key() {
        let store = StoreSchema::new("st", Some("id"));
        let entries = rows_to_entries(&rows(), &store, None).expect("entries");
        let keys: Vec<_> = entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![Value::text("a"), Value::text("b")]);
    }

    #[test]
    fn multi_entry_index_rows_expand_per_element() {
        let store =
            StoreSchema::new("st", Some("id")).with_index(IndexSchema::new("tag").multi_entry());
        let entries = rows_to_entries(&rows(), &store, Some("tag")).expect("entries");
        let pairs: Vec<_> = entries
            .iter()
            .map(|e| (e.key.clone(), e.primary_key.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Value::text("x"), Value::text("b")),
                (Value::text("y"), Value::text("a")),
                (Value::text("y"), Value::text("b")),
            ]
        );
    }
}
