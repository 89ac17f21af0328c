use crate::catalog::types::Value;
use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl Direction {
    pub fn parse(s: &str) -> Result<Self, DbError> {
        match s.to_ascii_lowercase().as_str() {
            "next" => Ok(Direction::Next),
            "nextunique" => Ok(Direction::NextUnique),
            "prev" => Ok(Direction::Prev),
            "prevunique" => Ok(Direction::PrevUnique),
            other => Err(DbError::Argument(format!("unsupported direction '{other}'"))),
        }
    }

    pub fn is_reverse(self) -> bool {
        matches!(self, Direction::Prev | Direction::PrevUnique)
    }

    pub fn is_unique(self) -> bool {
        matches!(self, Direction::NextUnique | Direction::PrevUnique)
    }

    pub fn with_unique(self, unique: bool) -> Self {
        match (self.is_reverse(), unique) {
            (false, false) => Direction::Next,
            (false, true) => Direction::NextUnique,
            (true, false) => Direction::Prev,
            (true, true) => Direction::PrevUnique,
        }
    }

    pub fn with_reverse(self, reverse: bool) -> Self {
        match (reverse, self.is_unique()) {
            (false, false) => Direction::Next,
            (false, true) => Direction::NextUnique,
            (true, false) => Direction::Prev,
            (true, true) => Direction::PrevUnique,
        }
    }

    /// Compares two keys in traversal order: `Less` means `a` is visited first.
    pub fn traversal_cmp(self, a: &Value, b: &Value) -> Ordering {
        if self.is_reverse() { b.cmp(a) } else { a.cmp(b) }
    }
}

/// A positioned cursor over one store or index, owned by a transaction.
pub trait Cursor {
    fn is_done(&self) -> bool;
    /// Effective key: the index key for index cursors, else the primary key.
    fn key(&self) -> Option<&Value>;
    fn primary_key(&self) -> Option<&Value>;
    fn value(&self) -> Option<&Value>;
    fn advance(&mut self) -> Result<(), DbError>;
    /// Moves forward in traversal order to the first entry whose key is at or
    /// past `key`. Never moves backwards.
    fn seek(&mut self, key: &Value) -> Result<(), DbError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry {
    pub key: Value,
    pub primary_key: Value,
    pub value: Value,
}

/// Cursor over a materialized list of entries.
#[derive(Debug)]
pub struct EntryCursor {
    entries: Vec<CursorEntry>,
    pos: usize,
    direction: Direction,
}

impl EntryCursor {
    /// `entries` must be sorted ascending by (key, primary key).
    pub fn new(mut entries: Vec<CursorEntry>, direction: Direction) -> Self {
        if direction.is_reverse() {
            entries.reverse();
        }
        if direction.is_unique() {
            // first entry seen in traversal order wins
            entries.dedup_by(|later, first| later.key == first.key);
        }
        Self {
            entries,
            pos: 0,
            direction,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn current(&self) -> Option<&CursorEntry> {
        self.entries.get(self.pos)
    }
}

impl Cursor for EntryCursor {
    fn is_done(&self) -> bool {
        self.pos >= self.entries.len()
    }

    fn key(&self) -> Option<&Value> {
        self.current().map(|e| &e.key)
    }

    fn primary_key(&self) -> Option<&Value> {
        self.current().map(|e| &e.primary_key)
    }

    fn value(&self) -> Option<&Value> {
        self.current().map(|e| &e.value)
    }

    fn advance(&mut self) -> Result<(), DbError> {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &Value) -> Result<(), DbError> {
        while let Some(entry) = self.entries.get(self.pos) {
            if self.direction.traversal_cmp(&entry.key, key) != Ordering::Less {
                break;
            }
            self.pos += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Cursor, CursorEntry, Direction, EntryCursor};
    use crate::catalog::types::Value;

    fn entries() -> Vec<CursorEntry> {
        [(1, "a"), (1, "b"), (2, "c"), (3, "d"), (3, "e")]
            .into_iter()
            .map(|(k, pk)| CursorEntry {
                key: Value::Integer(k),
                primary_key: Value::text(pk),
                value: Value::Null,
            })
            .collect()
    }

    fn drain(mut cursor: EntryCursor) -> Vec<String> {
        let mut out = Vec::new();
        while !cursor.is_done() {
            out.push(cursor.primary_key().and_then(Value::as_str).unwrap_or("").to_string());
            cursor.advance().expect("advance");
        }
        out
    }

    #[test]
    fn unique_directions_keep_first_primary_key_in_traversal_order() {
        assert_eq!(drain(EntryCursor::new(entries(), Direction::NextUnique)), ["a", "c", "d"]);
        assert_eq!(drain(EntryCursor::new(entries(), Direction::PrevUnique)), ["e", "c", "b"]);
    }

    #[test]
    fn seek_moves_forward_in_traversal_order() {
        let mut cursor = EntryCursor::new(entries(), Direction::Next);
        cursor.seek(&Value::Integer(2)).expect("seek");
        assert_eq!(cursor.primary_key(), Some(&Value::text("c")));
        cursor.seek(&Value::Integer(1)).expect("seek back is a no-op");
        assert_eq!(cursor.primary_key(), Some(&Value::text("c")));

        let mut reverse = EntryCursor::new(entries(), Direction::Prev);
        reverse.seek(&Value::Integer(1)).expect("seek");
        assert_eq!(reverse.primary_key(), Some(&Value::text("b")));
    }

    #[test]
    fn direction_parsing_rejects_unknown_strings() {
        assert_eq!(Direction::parse("prevunique").expect("dir"), Direction::PrevUnique);
        assert!(Direction::parse("sideways").is_err());
        assert_eq!(Direction::Next.with_unique(true).with_reverse(true), Direction::PrevUnique);
    }
}
