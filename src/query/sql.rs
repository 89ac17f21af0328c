use crate::catalog::schema::StoreSchema;
use crate::catalog::types::Value;
use crate::error::DbError;
use crate::query::aggregate::Aggregate;
use crate::query::compiler::QueryResult;
use crate::query::predicate::{Predicate, Projection};
use crate::scan::iterator::IteratorSpec;
use crate::storage::backend::RowSet;
use crate::storage::cursor::Direction;
use crate::storage::key_range::KeyRange;
use std::fmt::Write;

/// Implicit row id column of relational stores without a key path.
pub const ROWID_COLUMN: &str = "_ROWID_";

/// How rows returned by an [`SqlPlan`] turn into a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlShape {
    Records,
    Projected(Projection),
    /// The statement computes the aggregate; the result is its first cell.
    Aggregate(Aggregate),
    /// Records are folded after the read.
    Fold(Aggregate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlPlan {
    pub store: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub shape: SqlShape,
    /// Clauses no index answers, evaluated against each returned record.
    pub post_filter: Option<Predicate>,
    /// Paging left to [`SqlPlan::shape_rows`] because it must follow the
    /// post filter. `None` and 0 when the statement pages itself.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SqlPlan {
    pub fn shape_rows(&self, rows: &RowSet) -> Result<QueryResult, DbError> {
        if let SqlShape::Aggregate(_) = self.shape {
            return Ok(QueryResult::Aggregate(rows.first_value()));
        }
        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0;
        for row in &rows.rows {
            if self.limit.is_some_and(|limit| records.len() >= limit) {
                break;
            }
            let record = rows.record(row)?;
            if !self.post_filter.as_ref().is_none_or(|p| p.eval(&record)) {
                continue;
            }
            if skipped < self.offset {
                skipped += 1;
                continue;
            }
            records.push(record);
        }
        Ok(match &self.shape {
            SqlShape::Projected(projection) => {
                QueryResult::Records(records.iter().map(|r| projection.apply(r)).collect())
            }
            SqlShape::Fold(aggregate) => QueryResult::Aggregate(aggregate.fold(&records)),
            _ => QueryResult::Records(records),
        })
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// LIKE pattern matching strings that start with `prefix`, escaped with `\`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn primary_column(store: &StoreSchema) -> &str {
    store.order_column().unwrap_or(ROWID_COLUMN)
}

/// Column a cursor over `index` (or the primary key) reads its key from.
pub fn key_column<'a>(store: &'a StoreSchema, index: Option<&str>) -> Result<&'a str, DbError> {
    match index {
        Some(name) => Ok(store.require_index(name)?.key_path.as_str()),
        None => Ok(primary_column(store)),
    }
}

pub(crate) fn range_conditions(
    column: &str,
    range: &KeyRange,
    conditions: &mut Vec<String>,
    params: &mut Vec<Value>,
) {
    let quoted = quote_ident(column);
    if let Some(prefix) = range.prefix() {
        conditions.push(format!("{quoted} LIKE ? ESCAPE '\\'"));
        params.push(Value::from(like_prefix(prefix)));
        return;
    }
    if let (Some(lower), Some(upper)) = (range.lower(), range.upper())
        && lower == upper
        && !range.lower_open()
        && !range.upper_open()
    {
        conditions.push(format!("{quoted} = ?"));
        params.push(lower.clone());
        return;
    }
    if let Some(lower) = range.lower() {
        let op = if range.lower_open() { ">" } else { ">=" };
        conditions.push(format!("{quoted} {op} ?"));
        params.push(lower.clone());
    }
    if let Some(upper) = range.upper() {
        let op = if range.upper_open() { "<" } else { "<=" };
        conditions.push(format!("{quoted} {op} ?"));
        params.push(upper.clone());
    }
}

/// Splits paging between the statement and the plan: with a post filter the
/// statement must return every candidate row.
pub(crate) fn split_paging(
    post_filter: Option<&Predicate>,
    limit: Option<usize>,
    offset: usize,
) -> ((Option<usize>, usize), (Option<usize>, usize)) {
    match post_filter {
        Some(_) => ((None, 0), (limit, offset)),
        None => ((limit, offset), (None, 0)),
    }
}

/// Appends `WHERE`, `ORDER BY`, `LIMIT` and `OFFSET` to `sql`.
pub(crate) fn finish_statement(
    sql: &mut String,
    conditions: &[String],
    order_column: &str,
    direction: Direction,
    limit: Option<usize>,
    offset: usize,
) {
    if !conditions.is_empty() {
        let _ = write!(sql, " WHERE {}", conditions.join(" AND "));
    }
    let order = if direction.is_reverse() { "DESC" } else { "ASC" };
    let _ = write!(sql, " ORDER BY {} {order}", quote_ident(order_column));
    match (limit, offset) {
        (Some(limit), 0) => {
            let _ = write!(sql, " LIMIT {limit}");
        }
        (Some(limit), offset) => {
            let _ = write!(sql, " LIMIT {limit} OFFSET {offset}");
        }
        (None, 0) => {}
        (None, offset) => {
            let _ = write!(sql, " LIMIT -1 OFFSET {offset}");
        }
    }
}

/// Statement reading the entries a cursor over `index` and `range` visits.
pub fn cursor_sql(
    store: &StoreSchema,
    index: Option<&str>,
    range: Option<&KeyRange>,
    direction: Direction,
    limit: Option<usize>,
    offset: usize,
) -> Result<(String, Vec<Value>), DbError> {
    let column = key_column(store, index)?;
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    if let Some(range) = range {
        range_conditions(column, range, &mut conditions, &mut params);
    }
    let distinct = if direction.is_unique() { "DISTINCT " } else { "" };
    let mut sql = format!("SELECT {distinct}* FROM {}", quote_ident(&store.name));
    finish_statement(&mut sql, &conditions, column, direction, limit, offset);
    Ok((sql, params))
}

/// Converts an iterator into an SQL plan for relational backends.
pub fn iterator_to_sql(spec: &IteratorSpec, store: &StoreSchema) -> Result<SqlPlan, DbError> {
    let post_filter = spec.filter().cloned();
    let ((sql_limit, sql_offset), (limit, offset)) =
        split_paging(post_filter.as_ref(), spec.limit(), spec.offset());
    let (sql, params) = cursor_sql(
        store,
        spec.index(),
        spec.range(),
        spec.direction(),
        sql_limit,
        sql_offset,
    )?;
    let shape = match (spec.reduce(), spec.map()) {
        (Some(aggregate), _) => SqlShape::Fold(aggregate.clone()),
        (None, Some(projection)) => SqlShape::Projected(projection.clone()),
        (None, None) => SqlShape::Records,
    };
    Ok(SqlPlan {
        store: store.name.clone(),
        sql,
        params,
        shape,
        post_filter,
        limit,
        offset,
    })
}
