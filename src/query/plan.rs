use crate::catalog::schema::DatabaseSchema;
use crate::catalog::types::Value;
use crate::error::DbError;
use crate::query::aggregate::Aggregate;
use crate::query::compiler::{CompileTarget, CompiledPlan, SqlPlan, compile};
use crate::query::predicate::{CompareOp, Predicate, Projection};
use crate::scan::iterator::IteratorSpec;
use crate::storage::cursor::Direction;
use crate::storage::key_range::KeyRange;

#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
    /// Optional second bound on the same field, e.g. `> 2 AND <= 5`.
    pub second: Option<(CompareOp, Value)>,
}

impl WhereClause {
    pub fn new(field: &str, op: CompareOp, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
            second: None,
        }
    }

    pub fn to_predicate(&self) -> Predicate {
        let first = Predicate::compare(&self.field, self.op, self.value.clone());
        match &self.second {
            Some((op, value)) => first.and(Predicate::compare(&self.field, *op, value.clone())),
            None => first,
        }
    }

    /// Key range answering this clause, `None` for `!=`.
    pub fn to_key_range(&self) -> Result<Option<KeyRange>, DbError> {
        let (mut lower, mut upper) = (None, None);
        let mut bounds = vec![(self.op, &self.value)];
        if let Some((op, value)) = &self.second {
            bounds.push((*op, value));
        }
        for (op, value) in bounds {
            match op {
                CompareOp::Eq => return KeyRange::only(value.clone()).map(Some),
                CompareOp::Ne => return Ok(None),
                op if op.is_lower() => lower = Some((value.clone(), op.is_exclusive())),
                op => upper = Some((value.clone(), op.is_exclusive())),
            }
        }
        let (lower, lower_open) = lower.map_or((None, false), |(v, open)| (Some(v), open));
        let (upper, upper_open) = upper.map_or((None, false), |(v, open)| (Some(v), open));
        KeyRange::bounded(lower, upper, lower_open, upper_open).map(Some)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Project(Projection),
    Aggregate(Aggregate),
}

/// Declarative query over one store, built by chained calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub store: String,
    pub clauses: Vec<WhereClause>,
    pub selection: Option<Selection>,
    pub direction: Direction,
    pub index: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sql: Option<String>,
}

impl Query {
    pub fn from(store: &str) -> Self {
        Self {
            store: store.to_string(),
            clauses: Vec::new(),
            selection: None,
            direction: Direction::Next,
            index: None,
            limit: None,
            offset: 0,
            sql: None,
        }
    }

    /// Raw SQL text. Accepted but never compiled.
    pub fn sql(text: &str) -> Self {
        Self {
            sql: Some(text.to_string()),
            ..Self::from("")
        }
    }

    pub fn where_(self, field: &str, op: &str, value: impl Into<Value>) -> Result<Self, DbError> {
        let clause = WhereClause::new(field, CompareOp::parse(op)?, value.into());
        self.push_clause(clause)
    }

    pub fn where_range(
        self,
        field: &str,
        op: &str,
        value: impl Into<Value>,
        op2: &str,
        value2: impl Into<Value>,
    ) -> Result<Self, DbError> {
        let (first, second) = (CompareOp::parse(op)?, CompareOp::parse(op2)?);
        let paired = (first.is_lower() && second.is_upper())
            || (first.is_upper() && second.is_lower());
        if !paired {
            return Err(DbError::Argument(format!(
                "operators '{op}' and '{op2}' do not form a range on '{field}'"
            )));
        }
        let mut clause = WhereClause::new(field, first, value.into());
        clause.second = Some((second, value2.into()));
        self.push_clause(clause)
    }

    fn push_clause(mut self, clause: WhereClause) -> Result<Self, DbError> {
        if self.clauses.iter().any(|c| c.field == clause.field) {
            return Err(DbError::Argument(format!(
                "field '{}' already has a where clause",
                clause.field
            )));
        }
        self.clauses.push(clause);
        Ok(self)
    }

    /// Sets the projection (`"select"`) or an aggregate (`"count"`, `"sum"`,
    /// `"avg"`, `"min"`, `"max"`).
    pub fn select(mut self, method: &str, fields: &[&str]) -> Result<Self, DbError> {
        if self.selection.is_some() {
            return Err(DbError::Constraint(format!(
                "selection already set, cannot apply '{method}'"
            )));
        }
        let field = || -> Result<String, DbError> {
            match fields {
                [field] => Ok(field.to_string()),
                _ => Err(DbError::Argument(format!(
                    "'{method}' needs exactly one field"
                ))),
            }
        };
        let selection = match method.to_ascii_lowercase().as_str() {
            "select" | "values" => {
                if fields.is_empty() {
                    return Err(DbError::Argument("select needs at least one field".into()));
                }
                Selection::Project(Projection::from_fields(fields))
            }
            "count" => Selection::Aggregate(Aggregate::Count),
            "sum" => Selection::Aggregate(Aggregate::Sum(field()?)),
            "avg" | "average" => Selection::Aggregate(Aggregate::Average(field()?)),
            "min" => Selection::Aggregate(Aggregate::Min(field()?)),
            "max" => Selection::Aggregate(Aggregate::Max(field()?)),
            other => {
                return Err(DbError::Argument(format!("unknown select method '{other}'")));
            }
        };
        self.selection = Some(selection);
        Ok(self)
    }

    pub fn order_by(mut self, index: &str) -> Self {
        self.index = Some(index.to_string());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.direction = self.direction.with_unique(unique);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.direction = self.direction.with_reverse(reverse);
        self
    }

    pub fn limit(mut self, limit: i64) -> Result<Self, DbError> {
        if limit <= 0 {
            return Err(DbError::Argument(format!("limit must be positive, got {limit}")));
        }
        self.limit = Some(limit as usize);
        Ok(self)
    }

    pub fn offset(mut self, offset: i64) -> Result<Self, DbError> {
        if offset < 0 {
            return Err(DbError::Argument(format!(
                "offset must not be negative, got {offset}"
            )));
        }
        self.offset = offset as usize;
        Ok(self)
    }

    pub fn to_iterator_spec(&self, schema: &DatabaseSchema) -> Result<IteratorSpec, DbError> {
        match compile(self, schema, CompileTarget::Native)? {
            CompiledPlan::Native(spec) => Ok(spec),
            CompiledPlan::Sql(_) => Err(DbError::Argument(
                "native compilation produced an sql plan".into(),
            )),
        }
    }

    pub fn to_sql_plan(&self, schema: &DatabaseSchema) -> Result<SqlPlan, DbError> {
        match compile(self, schema, CompileTarget::Sql)? {
            CompiledPlan::Sql(plan) => Ok(plan),
            CompiledPlan::Native(_) => Err(DbError::Argument(
                "sql compilation produced a native plan".into(),
            )),
        }
    }
}
