use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A dynamically typed record value.
///
/// Values double as keys: integers and floats share one numeric rank, then
/// dates, strings, binary and arrays follow in that order. Kinds that can
/// not be keys (null, booleans, objects) sort before every key so the
/// ordering stays total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Text(CompactString),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// A record is an arbitrary value, usually an object.
pub type Record = Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Object(_) => 2,
            Value::Integer(_) | Value::Float(_) => 3,
            Value::Timestamp(_) => 4,
            Value::Text(_) => 5,
            Value::Blob(_) => 6,
            Value::Array(_) => 7,
        }
    }

    /// Whether this value can be used as a primary or index key.
    pub fn is_key(&self) -> bool {
        match self {
            Value::Integer(_) | Value::Timestamp(_) | Value::Text(_) | Value::Blob(_) => true,
            Value::Float(f) => f.is_finite(),
            Value::Array(items) => items.iter().all(Value::is_key),
            Value::Null | Value::Boolean(_) | Value::Object(_) => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn text(s: &str) -> Self {
        Value::Text(s.into())
    }

    /// Resolves a dotted field path (`"a.b.c"`) against nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            match current {
                Value::Object(fields) => current = fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Sets a top-level field, turning non-objects into an empty object first.
    pub fn set_field(&mut self, field: &str, value: Value) {
        if !matches!(self, Value::Object(_)) {
            *self = Value::Object(BTreeMap::new());
        }
        if let Value::Object(fields) = self {
            fields.insert(field.to_string(), value);
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Timestamp(ts) => serde_json::Value::from(*ts),
            Value::Text(s) => serde_json::Value::String(s.to_string()),
            Value::Blob(bytes) => serde_json::Value::Array(
                bytes.iter().map(|b| serde_json::Value::from(*b)).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// 2^63, the first float above every `i64`.
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

fn cmp_float(a: f64, b: f64) -> Ordering {
    // -0.0 and 0.0 are one key; NaN sorts by sign at either end
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

/// Exact integer-to-float comparison; casting either side loses precision
/// past 2^53.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_UPPER {
        return Ordering::Less;
    }
    if float < -I64_UPPER {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    int.cmp(&(whole as i64)).then_with(|| cmp_float(whole, float))
}

fn cmp_numeric(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => cmp_float(*a, *b),
        (Value::Integer(a), Value::Float(b)) => cmp_int_float(*a, *b),
        (Value::Float(a), Value::Integer(b)) => cmp_int_float(*b, *a).reverse(),
        _ => Ordering::Equal,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            _ => cmp_numeric(self, other),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s.into()),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_key() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("finite float only", |v| v.is_finite())
                .prop_map(Value::Float),
            any::<i64>().prop_map(Value::Timestamp),
            "\\PC{0,16}".prop_map(|s| Value::Text(s.into())),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Blob),
        ];
        leaf.prop_recursive(2, 8, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Value::Array)
        })
    }

    fn arb_number() -> impl Strategy<Value = Value> {
        let edge = 1i64 << 53;
        prop_oneof![
            (-4i64..4).prop_map(move |d| Value::Integer(edge + d)),
            (-4i64..4).prop_map(move |d| Value::Float((edge + d) as f64)),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>().prop_map(Value::Float),
            Just(Value::Integer(i64::MAX)),
            Just(Value::Float(i64::MAX as f64)),
        ]
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in arb_key(), b in arb_key()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn numeric_ordering_is_transitive(
            a in arb_number(),
            b in arb_number(),
            c in arb_number(),
        ) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
            if a == b && b == c {
                prop_assert_eq!(a, c);
            }
        }

        #[test]
        fn generated_keys_are_valid(a in arb_key()) {
            prop_assert!(a.is_key());
        }
    }

    #[test]
    fn key_kinds_follow_numeric_date_string_binary_array_order() {
        let ordered = [
            Value::Integer(5),
            Value::Timestamp(0),
            Value::text("a"),
            Value::Blob(vec![0]),
            Value::Array(vec![]),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} should sort before {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert_eq!(Value::Integer(2), Value::Float(2.0));
        assert!(Value::Integer(2) < Value::Float(2.5));
        assert!(Value::Float(-1.5) < Value::Integer(0));
        assert!(Value::Integer(-2) < Value::Float(-1.5));
        assert_eq!(Value::Integer(0), Value::Float(-0.0));
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn large_integers_compare_exactly_against_floats() {
        let edge = 1i64 << 53;
        let float = Value::Float(edge as f64);
        assert_eq!(Value::Integer(edge), float);
        assert!(float < Value::Integer(edge + 1));
        assert!(Value::Integer(i64::MAX) < Value::Float(i64::MAX as f64));
        assert!(Value::Integer(i64::MIN) == Value::Float(i64::MIN as f64));
    }

    #[test]
    fn get_path_walks_nested_objects() {
        let record = Value::from(json!({"a": {"b": {"c": 3}}, "x": 1}));
        assert_eq!(record.get_path("a.b.c"), Some(&Value::Integer(3)));
        assert_eq!(record.get_path("x"), Some(&Value::Integer(1)));
        assert_eq!(record.get_path("x.y"), None);
        assert_eq!(record.get_path("missing"), None);
    }

    #[test]
    fn non_key_kinds_are_rejected_as_keys() {
        assert!(!Value::Null.is_key());
        assert!(!Value::Boolean(true).is_key());
        assert!(!Value::Float(f64::NAN).is_key());
        assert!(!Value::Array(vec![Value::Null]).is_key());
        assert!(!Value::from(json!({"a": 1})).is_key());
    }

    #[test]
    fn json_conversion_keeps_structure() {
        let source = json!({"id": "qs0", "value": 0, "tag": ["a", "b"], "score": 1.5});
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }
}
