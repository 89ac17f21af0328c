use crate::catalog::types::Value;
use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Bound;

/// Immutable interval over the key ordering, or a string prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    lower: Option<Value>,
    upper: Option<Value>,
    lower_open: bool,
    upper_open: bool,
    prefix: bool,
}

fn check_key(value: &Value, which: &str) -> Result<(), DbError> {
    if value.is_key() {
        Ok(())
    } else {
        Err(DbError::Argument(format!(
            "{which} bound {value:?} is not a valid key"
        )))
    }
}

impl KeyRange {
    pub fn bounded(
        lower: Option<Value>,
        upper: Option<Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, DbError> {
        if let Some(lower) = &lower {
            check_key(lower, "lower")?;
        }
        if let Some(upper) = &upper {
            check_key(upper, "upper")?;
        }
        if let (Some(l), Some(u)) = (&lower, &upper)
            && l > u
        {
            return Err(DbError::InvalidRange(format!(
                "lower bound {l:?} is greater than upper bound {u:?}"
            )));
        }
        Ok(Self {
            lower,
            upper,
            lower_open,
            upper_open,
            prefix: false,
        })
    }

    pub fn lower_bound(value: Value, open: bool) -> Result<Self, DbError> {
        Self::bounded(Some(value), None, open, false)
    }

    pub fn upper_bound(value: Value, open: bool) -> Result<Self, DbError> {
        Self::bounded(None, Some(value), false, open)
    }

    pub fn only(value: Value) -> Result<Self, DbError> {
        Self::bounded(Some(value.clone()), Some(value), false, false)
    }

    /// Matches every string key starting with `prefix`.
    pub fn starts_with(prefix: &str) -> Self {
        Self {
            lower: Some(Value::text(prefix)),
            upper: None,
            lower_open: false,
            upper_open: false,
            prefix: true,
        }
    }

    pub fn is_prefix_range(&self) -> bool {
        self.prefix
    }

    pub fn lower(&self) -> Option<&Value> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Value> {
        if self.prefix { None } else { self.upper.as_ref() }
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// The prefix string when this is a prefix range.
    pub fn prefix(&self) -> Option<&str> {
        if self.prefix {
            self.lower.as_ref().and_then(Value::as_str)
        } else {
            None
        }
    }

    pub fn contains(&self, key: &Value) -> bool {
        if let Some(prefix) = self.prefix() {
            return key.as_str().is_some_and(|s| s.starts_with(prefix));
        }
        let above_lower = match &self.lower {
            Some(lower) => match key.cmp(lower) {
                Ordering::Greater => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Less => false,
            },
            None => true,
        };
        let below_upper = match &self.upper {
            Some(upper) => match key.cmp(upper) {
                Ordering::Less => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Greater => false,
            },
            None => true,
        };
        above_lower && below_upper
    }

    /// Range bounds usable with ordered maps. A prefix range yields its lower
    /// bound only; callers still have to check [`KeyRange::contains`].
    pub fn to_bounds(&self) -> (Bound<Value>, Bound<Value>) {
        let lower = match &self.lower {
            Some(v) if self.lower_open && !self.prefix => Bound::Excluded(v.clone()),
            Some(v) => Bound::Included(v.clone()),
            None => Bound::Unbounded,
        };
        let upper = match self.upper() {
            Some(v) if self.upper_open => Bound::Excluded(v.clone()),
            Some(v) => Bound::Included(v.clone()),
            None => Bound::Unbounded,
        };
        (lower, upper)
    }
}
