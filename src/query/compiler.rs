use crate::catalog::schema::{DatabaseSchema, StoreSchema};
use crate::catalog::types::Value;
use crate::config::BackendKind;
use crate::error::DbError;
use crate::query::aggregate::Aggregate;
use crate::query::plan::{Query, Selection, WhereClause};
use crate::query::predicate::Predicate;
use crate::query::sql::{SqlShape, finish_statement, primary_column, quote_ident, split_paging};
use crate::scan::iterator::IteratorSpec;
use tracing::trace;

pub use crate::query::sql::SqlPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileTarget {
    Native,
    Sql,
}

impl CompileTarget {
    pub fn for_backend(kind: BackendKind) -> Self {
        if kind.prefers_sql() {
            CompileTarget::Sql
        } else {
            CompileTarget::Native
        }
    }
}

#[derive(Debug, Clone)]
pub enum CompiledPlan {
    Native(IteratorSpec),
    Sql(SqlPlan),
}

/// Output of an executed plan.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Records(Vec<Value>),
    Aggregate(Value),
}

impl QueryResult {
    pub fn records(self) -> Vec<Value> {
        match self {
            QueryResult::Records(records) => records,
            QueryResult::Aggregate(value) => vec![value],
        }
    }

    pub fn aggregate(&self) -> Option<&Value> {
        match self {
            QueryResult::Aggregate(value) => Some(value),
            QueryResult::Records(_) => None,
        }
    }
}

/// Where a clause's field can be answered from.
enum Eligibility<'a> {
    Index { name: &'a str, column: &'a str },
    Primary { column: &'a str },
    Filter,
}

fn eligibility<'a>(store: &'a StoreSchema, field: &str) -> Eligibility<'a> {
    if let Some(index) = store.index_for_field(field) {
        return Eligibility::Index {
            name: &index.name,
            column: &index.key_path,
        };
    }
    if store.is_primary_field(field)
        && let Some(column) = store.order_column()
    {
        return Eligibility::Primary { column };
    }
    Eligibility::Filter
}

pub fn compile(
    query: &Query,
    schema: &DatabaseSchema,
    target: CompileTarget,
) -> Result<CompiledPlan, DbError> {
    if query.sql.is_some() {
        return Err(DbError::NotImplemented(
            "SQL text queries are not supported".into(),
        ));
    }
    let store = schema.require_store(&query.store)?;
    if let Some(index) = &query.index {
        store.require_index(index)?;
    }
    let plan = match target {
        CompileTarget::Native => CompiledPlan::Native(compile_native(query, store)?),
        CompileTarget::Sql => CompiledPlan::Sql(compile_sql(query, store)?),
    };
    trace!(store = %query.store, ?target, "query compiled");
    Ok(plan)
}

fn compile_native(query: &Query, store: &StoreSchema) -> Result<IteratorSpec, DbError> {
    // (clause position, index name or None for the primary key, range)
    let mut driving = None;
    for (pos, clause) in query.clauses.iter().enumerate() {
        let index = match (eligibility(store, &clause.field), &query.index) {
            (Eligibility::Index { name, .. }, Some(explicit)) if name == explicit.as_str() => {
                Some(name)
            }
            (_, Some(_)) => continue,
            (Eligibility::Index { name, .. }, None) => Some(name),
            (Eligibility::Primary { .. }, None) => None,
            (Eligibility::Filter, None) => continue,
        };
        if let Some(range) = clause.to_key_range()? {
            driving = Some((pos, index, range));
            break;
        }
    }

    let index = match (&query.index, &driving) {
        (Some(explicit), _) => Some(explicit.as_str()),
        (None, Some((_, index, _))) => *index,
        (None, None) => None,
    };
    let mut spec = match index {
        Some(index) => IteratorSpec::index_values(&store.name, index),
        None => IteratorSpec::values(&store.name),
    }
    .with_direction(query.direction)
    .with_offset(query.offset);
    if let Some(limit) = query.limit {
        spec = spec.with_limit(limit);
    }

    let driving_pos = driving.as_ref().map(|(pos, _, _)| *pos);
    if let Some((_, _, range)) = driving {
        spec = spec.with_range(range);
    }
    let residual = query
        .clauses
        .iter()
        .enumerate()
        .filter(|(pos, _)| Some(*pos) != driving_pos)
        .map(|(_, clause)| clause.to_predicate());
    if let Some(filter) = Predicate::all(residual) {
        filter.validate_depth()?;
        spec = spec.with_filter(filter);
    }

    match &query.selection {
        Some(Selection::Project(projection)) => spec = spec.with_map(projection.clone()),
        Some(Selection::Aggregate(aggregate)) => spec = spec.with_reduce(aggregate.clone()),
        None => {}
    }
    Ok(spec)
}

fn push_clause(
    column: &str,
    clause: &WhereClause,
    conditions: &mut Vec<String>,
    params: &mut Vec<Value>,
) {
    let quoted = quote_ident(column);
    conditions.push(format!("{quoted} {} ?", clause.op.as_sql()));
    params.push(clause.value.clone());
    if let Some((op, value)) = &clause.second {
        conditions.push(format!("{quoted} {} ?", op.as_sql()));
        params.push(value.clone());
    }
}

fn aggregate_sql(aggregate: &Aggregate) -> String {
    match aggregate {
        Aggregate::Count => "COUNT(*)".to_string(),
        Aggregate::Sum(field) => format!("SUM({})", quote_ident(field)),
        Aggregate::Average(field) => format!("AVG({})", quote_ident(field)),
        Aggregate::Min(field) => format!("MIN({})", quote_ident(field)),
        Aggregate::Max(field) => format!("MAX({})", quote_ident(field)),
    }
}

fn compile_sql(query: &Query, store: &StoreSchema) -> Result<SqlPlan, DbError> {
    let mut conditions = Vec::new();
    let mut params = Vec::new();
    let mut residual = Vec::new();
    let mut first_column = None;
    for clause in &query.clauses {
        match eligibility(store, &clause.field) {
            Eligibility::Index { column, .. } | Eligibility::Primary { column } => {
                first_column.get_or_insert(column);
                push_clause(column, clause, &mut conditions, &mut params);
            }
            Eligibility::Filter => residual.push(clause.to_predicate()),
        }
    }
    let post_filter = Predicate::all(residual);

    let order_column = match &query.index {
        Some(index) => store.require_index(index)?.key_path.as_str(),
        None => first_column.unwrap_or_else(|| primary_column(store)),
    };

    let (select, shape) = match &query.selection {
        Some(Selection::Aggregate(aggregate)) => {
            if post_filter.is_some() {
                return Err(DbError::Parse(format!(
                    "{} cannot be computed in SQL when non-indexed fields are filtered",
                    aggregate.name()
                )));
            }
            (aggregate_sql(aggregate), SqlShape::Aggregate(aggregate.clone()))
        }
        Some(Selection::Project(projection)) => {
            ("*".to_string(), SqlShape::Projected(projection.clone()))
        }
        None => ("*".to_string(), SqlShape::Records),
    };
    let distinct = match &shape {
        SqlShape::Aggregate(_) => "",
        _ if query.direction.is_unique() => "DISTINCT ",
        _ => "",
    };
    let ((sql_limit, sql_offset), (limit, offset)) =
        split_paging(post_filter.as_ref(), query.limit, query.offset);
    let mut sql = format!("SELECT {distinct}{select} FROM {}", quote_ident(&store.name));
    finish_statement(
        &mut sql,
        &conditions,
        order_column,
        query.direction,
        sql_limit,
        sql_offset,
    );
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
