use crate::catalog::types::Value;
use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Maximum nesting depth for predicate trees.
const MAX_PREDICATE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn parse(op: &str) -> Result<Self, DbError> {
        match op {
            "=" | "==" | "===" => Ok(CompareOp::Eq),
            "!=" | "!==" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Lte),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Gte),
            other => Err(DbError::Argument(format!("invalid operator '{other}'"))),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }

    pub fn is_lower(self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Gte)
    }

    pub fn is_upper(self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Lte)
    }

    pub fn is_exclusive(self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Lt)
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Lte => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Gte => ord != Ordering::Less,
        }
    }
}

/// Resolves `field` against `value`. An empty field names the value itself.
pub fn field_value<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    if field.is_empty() {
        Some(value)
    } else {
        value.get_path(field)
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Timestamp(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        _ => Some(left.cmp(right)),
    }
}

/// Post-read filter evaluated against each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    StartsWith {
        field: String,
        prefix: String,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn and(self, rhs: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// ANDs all predicates together, `None` when there are none.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::and)
    }

    pub fn depth(&self) -> usize {
        match self {
            Predicate::Compare { .. } | Predicate::StartsWith { .. } => 1,
            Predicate::Not(inner) => 1 + inner.depth(),
            Predicate::And(l, r) | Predicate::Or(l, r) => 1 + l.depth().max(r.depth()),
        }
    }

    pub fn validate_depth(&self) -> Result<(), DbError> {
        let depth = self.depth();
        if depth > MAX_PREDICATE_DEPTH {
            return Err(DbError::Argument(format!(
                "predicate depth {depth} exceeds maximum allowed depth of {MAX_PREDICATE_DEPTH}"
            )));
        }
        Ok(())
    }

    /// Fields referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { field, .. } | Predicate::StartsWith { field, .. } => {
                out.push(field)
            }
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
        }
    }

    pub fn eval(&self, record: &Value) -> bool {
        match self {
            Predicate::Compare { field, op, value } => field_value(record, field)
                .and_then(|actual| compare_values(actual, value))
                .is_some_and(|ord| op.holds(ord)),
            Predicate::StartsWith { field, prefix } => field_value(record, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Predicate::And(l, r) => l.eval(record) && r.eval(record),
            Predicate::Or(l, r) => l.eval(record) || r.eval(record),
            Predicate::Not(inner) => !inner.eval(record),
        }
    }
}

/// Post-read record shaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// A single field value.
    Field(String),
    /// An object holding the listed fields; missing fields are left out.
    Fields(Vec<String>),
}

impl Projection {
    pub fn from_fields(fields: &[&str]) -> Self {
        match fields {
            [single] => Projection::Field(single.to_string()),
            many => Projection::Fields(many.iter().map(|f| f.to_string()).collect()),
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        match self {
            Projection::Field(field) => vec![field.as_str()],
            Projection::Fields(fields) => fields.iter().map(String::as_str).collect(),
        }
    }

    pub fn apply(&self, record: &Value) -> Value {
        match self {
            Projection::Field(field) => field_value(record, field).cloned().unwrap_or(Value::Null),
            Projection::Fields(fields) => {
                let picked: BTreeMap<String, Value> = fields
                    .iter()
                    .filter_map(|f| field_value(record, f).map(|v| (f.clone(), v.clone())))
                    .collect();
                Value::Object(picked)
            }
        }
    }
}
