use crate::catalog::types::Value;
use crate::query::predicate::field_value;
use serde::{Deserialize, Serialize};

/// Streaming fold over the records of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Count,
    Sum(String),
    Average(String),
    Min(String),
    Max(String),
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum(_) => "sum",
            Aggregate::Average(_) => "avg",
            Aggregate::Min(_) => "min",
            Aggregate::Max(_) => "max",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Aggregate::Count => None,
            Aggregate::Sum(f) | Aggregate::Average(f) | Aggregate::Min(f) | Aggregate::Max(f) => {
                Some(f)
            }
        }
    }

    pub fn state(&self) -> AggregateState {
        match self {
            Aggregate::Count => AggregateState::Count(0),
            Aggregate::Sum(_) => AggregateState::Sum {
                int: 0,
                float: 0.0,
                integral: true,
                seen: false,
            },
            Aggregate::Average(_) => AggregateState::Average { mean: 0.0, n: 0 },
            Aggregate::Min(_) => AggregateState::Min(None),
            Aggregate::Max(_) => AggregateState::Max(None),
        }
    }

    /// Folds every record of `records` and returns the final value.
    pub fn fold<'a>(&self, records: impl IntoIterator<Item = &'a Value>) -> Value {
        let mut state = self.state();
        for record in records {
            state.update(self, record);
        }
        state.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateState {
    Count(i64),
    Sum {
        int: i64,
        float: f64,
        integral: bool,
        seen: bool,
    },
    Average {
        mean: f64,
        n: u64,
    },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl AggregateState {
    pub fn update(&mut self, aggregate: &Aggregate, record: &Value) {
        let input = aggregate.field().and_then(|f| field_value(record, f));
        match self {
            AggregateState::Count(n) => *n = n.saturating_add(1),
            AggregateState::Sum {
                int,
                float,
                integral,
                seen,
            } => match input {
                Some(Value::Integer(v)) => {
                    match int.checked_add(*v) {
                        Some(sum) => *int = sum,
                        None => *integral = false,
                    }
                    *float += *v as f64;
                    *seen = true;
                }
                Some(Value::Float(v)) => {
                    *float += v;
                    *integral = false;
                    *seen = true;
                }
                _ => {}
            },
            AggregateState::Average { mean, n } => {
                if let Some(curr) = input.and_then(Value::as_f64) {
                    let i = *n as f64;
                    *mean = (*mean * i + curr) / (i + 1.0);
                    *n += 1;
                }
            }
            AggregateState::Min(state) => {
                if let Some(value) = input.filter(|v| !v.is_null())
                    && state.as_ref().is_none_or(|current| value < current)
                {
                    *state = Some(value.clone());
                }
            }
            AggregateState::Max(state) => {
                if let Some(value) = input.filter(|v| !v.is_null())
                    && state.as_ref().is_none_or(|current| value > current)
                {
                    *state = Some(value.clone());
                }
            }
        }
    }

    pub fn finish(self) -> Value {
        match self {
            AggregateState::Count(n) => Value::Integer(n),
            AggregateState::Sum { seen: false, .. } => Value::Null,
            AggregateState::Sum {
                int,
                integral: true,
                ..
            } => Value::Integer(int),
            AggregateState::Sum { float, .. } => Value::Float(float),
            AggregateState::Average { n: 0, .. } => Value::Null,
            AggregateState::Average { mean, .. } => Value::Float(mean),
            AggregateState::Min(v) | AggregateState::Max(v) => v.unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Aggregate;
    use crate::catalog::types::Value;
    use serde_json::json;

    fn records() -> Vec<Value> {
        [1, 2, 3, 4]
            .into_iter()
            .map(|v| Value::from(json!({"value": v, "name": format!("n{v}")})))
            .collect()
    }

    #[test]
    fn count_sum_average() {
        let records = records();
        assert_eq!(Aggregate::Count.fold(&records), Value::Integer(4));
        assert_eq!(Aggregate::Sum("value".into()).fold(&records), Value::Integer(10));
        assert_eq!(Aggregate::Average("value".into()).fold(&records), Value::Float(2.5));
    }

    #[test]
    fn sum_turns_float_once_a_float_is_seen() {
        let records = vec![
            Value::from(json!({"value": 1})),
            Value::from(json!({"value": 0.5})),
        ];
        assert_eq!(Aggregate::Sum("value".into()).fold(&records), Value::Float(1.5));
    }

    #[test]
    fn sum_turns_float_on_integer_overflow() {
        let records = vec![
            Value::from(json!({"value": i64::MAX})),
            Value::from(json!({"value": 1})),
        ];
        assert_eq!(
            Aggregate::Sum("value".into()).fold(&records),
            Value::Float(i64::MAX as f64 + 1.0)
        );
    }

    #[test]
    fn folds_over_zero_to_three() {
        let records: Vec<Value> = (0..4)
            .map(|v| Value::from(json!({ "value": v })))
            .collect();
        assert_eq!(Aggregate::Count.fold(&records), Value::Integer(4));
        assert_eq!(Aggregate::Sum("value".into()).fold(&records), Value::Integer(6));
        assert_eq!(Aggregate::Average("value".into()).fold(&records), Value::Float(1.5));
        assert_eq!(Aggregate::Min("value".into()).fold(&records), Value::Integer(0));
        assert_eq!(Aggregate::Max("value".into()).fold(&records), Value::Integer(3));
    }

    #[test]
    fn min_max_use_key_ordering() {
        let records = records();
        assert_eq!(Aggregate::Min("name".into()).fold(&records), Value::text("n1"));
        assert_eq!(Aggregate::Max("value".into()).fold(&records), Value::Integer(4));
    }

    #[test]
    fn empty_input_yields_null_except_count() {
        let none: Vec<Value> = Vec::new();
        assert_eq!(Aggregate::Count.fold(&none), Value::Integer(0));
        for agg in [
            Aggregate::Sum("value".into()),
            Aggregate::Average("value".into()),
            Aggregate::Min("value".into()),
            Aggregate::Max("value".into()),
        ] {
            assert_eq!(agg.fold(&none), Value::Null, "{}", agg.name());
        }
    }

    #[test]
    fn empty_field_aggregates_the_value_itself() {
        let keys = vec![Value::Integer(3), Value::Integer(4)];
        assert_eq!(Aggregate::Sum(String::new()).fold(&keys), Value::Integer(7));
    }
}
