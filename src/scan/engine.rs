use crate::catalog::types::Value;
use crate::error::DbError;
use crate::query::compiler::QueryResult;
use crate::scan::directive::{Directive, Tuple, directive_for};
use crate::scan::iterator::IteratorSpec;
use crate::storage::backend::{CursorRequest, Transaction};
use crate::storage::cursor::Cursor;
use std::cmp::Ordering;
use tracing::trace;

static NULL: Value = Value::Null;

/// One cursor position as exposed to `open` callbacks.
#[derive(Debug, Clone, Copy)]
pub struct Position<'a> {
    pub key: &'a Value,
    pub primary_key: &'a Value,
    pub value: &'a Value,
}

struct Slot<'t> {
    spec: IteratorSpec,
    cursor: Box<dyn Cursor + 't>,
    running: bool,
    pending_offset: usize,
    delivered: usize,
}

impl<'t> Slot<'t> {
    fn open(tx: &'t dyn Transaction, spec: &IteratorSpec) -> Result<Self, DbError> {
        let state = spec.state();
        let resume = if state.done {
            spec.reset();
            None
        } else {
            state
                .position(spec.kind())
                .map(|(key, pk)| (key.clone(), pk.clone()))
        };
        let mut cursor = tx.open_cursor(&CursorRequest {
            store: spec.store(),
            index: spec.index(),
            range: spec.range(),
            direction: spec.direction(),
        })?;

        let mut pending_offset = spec.offset();
        if let Some((key, pk)) = &resume {
            cursor.seek(key)?;
            while !cursor.is_done() && at_or_before(spec, cursor.as_ref(), key, pk) {
                cursor.advance()?;
            }
            pending_offset = 0;
            trace!(store = spec.store(), ?key, "scan resumed");
        }

        let mut slot = Self {
            spec: spec.clone(),
            cursor,
            running: true,
            pending_offset,
            delivered: 0,
        };
        slot.settle()?;
        Ok(slot)
    }

    /// Skips entries the filter rejects and the pending offset.
    fn settle(&mut self) -> Result<(), DbError> {
        while !self.cursor.is_done() {
            let accepted = match (self.spec.filter(), self.current_raw()) {
                (Some(filter), Some(pos)) => {
                    filter.eval(self.spec.subject(pos.key, pos.primary_key, pos.value))
                }
                _ => true,
            };
            if accepted {
                if self.pending_offset == 0 {
                    break;
                }
                self.pending_offset -= 1;
            }
            self.cursor.advance()?;
        }
        if self.cursor.is_done() {
            self.spec.mark_done();
        }
        Ok(())
    }

    fn current_raw(&self) -> Option<Position<'_>> {
        Some(Position {
            key: self.cursor.key()?,
            primary_key: self.cursor.primary_key()?,
            value: self.cursor.value().unwrap_or(&NULL),
        })
    }

    fn current(&self) -> Option<Position<'_>> {
        if !self.running || self.spec.limit().is_some_and(|l| self.delivered >= l) {
            return None;
        }
        self.current_raw()
    }

    fn deliver(&mut self) {
        if let Some(pos) = self.current() {
            self.spec.record_position(pos.key, pos.primary_key);
        }
        self.delivered += 1;
    }

    /// Applies `directive`, returning whether the cursor moved.
    fn apply(&mut self, directive: &Directive) -> Result<bool, DbError> {
        match directive {
            Directive::Advance => {
                self.cursor.advance()?;
            }
            Directive::SeekTo(target) => {
                if let Some(current) = self.cursor.key()
                    && self.spec.direction().traversal_cmp(target, current) != Ordering::Greater
                {
                    return Err(DbError::Argument(format!(
                        "seek key {target:?} is not past the current key {current:?}"
                    )));
                }
                self.cursor.seek(target)?;
            }
            Directive::Stop => {
                self.running = false;
                return Ok(false);
            }
        }
        self.settle()?;
        Ok(true)
    }
}

/// Whether the cursor sits at or before the last delivered position.
fn at_or_before(spec: &IteratorSpec, cursor: &dyn Cursor, key: &Value, pk: &Value) -> bool {
    let (Some(ck), Some(cpk)) = (cursor.key(), cursor.primary_key()) else {
        return false;
    };
    let direction = spec.direction();
    match direction.traversal_cmp(ck, key) {
        Ordering::Less => true,
        Ordering::Equal => {
            direction.is_unique() || direction.traversal_cmp(cpk, pk) != Ordering::Greater
        }
        Ordering::Greater => false,
    }
}

/// Drives `specs` in lock-step inside `tx`.
///
/// Every tick hands the callback one [`Tuple`] and expects one directive per
/// slot back. The scan ends once no slot holds a position or no slot moved.
pub fn scan<F>(
    tx: &dyn Transaction,
    specs: &[IteratorSpec],
    mut on_tuple: F,
) -> Result<(), DbError>
where
    F: FnMut(&Tuple) -> Vec<Directive>,
{
    let mut slots = specs
        .iter()
        .map(|spec| Slot::open(tx, spec))
        .collect::<Result<Vec<_>, _>>()?;
    let mut ticks = 0usize;
    loop {
        let mut tuple = Tuple::default();
        for slot in &mut slots {
            let entry = slot.current().map(|pos| {
                (
                    slot.spec.tuple_key(pos.key),
                    slot.spec.tuple_value(pos.primary_key, pos.value),
                )
            });
            match entry {
                Some((key, value)) => {
                    slot.deliver();
                    tuple.keys.push(Some(key));
                    tuple.values.push(Some(value));
                }
                None => {
                    tuple.keys.push(None);
                    tuple.values.push(None);
                }
            }
        }
        if tuple.is_exhausted() {
            break;
        }
        ticks += 1;

        let directives = on_tuple(&tuple);
        let mut moved = false;
        for (i, slot) in slots.iter_mut().enumerate() {
            if tuple.keys[i].is_none() {
                continue;
            }
            moved |= slot.apply(directive_for(&directives, i))?;
        }
        if !moved {
            break;
        }
    }
    trace!(slots = specs.len(), ticks, "scan finished");
    Ok(())
}

/// Single-slot driver shared by the convenience operations.
fn drive<F>(tx: &dyn Transaction, spec: &IteratorSpec, mut step: F) -> Result<(), DbError>
where
    F: FnMut(Position<'_>) -> Directive,
{
    let mut slot = Slot::open(tx, spec)?;
    loop {
        let directive = match slot.current() {
            Some(pos) => step(pos),
            None => break,
        };
        slot.deliver();
        if !slot.apply(&directive)? {
            break;
        }
    }
    Ok(())
}

/// Calls `on_value` with the effective value of every position.
pub fn map<F>(tx: &dyn Transaction, spec: &IteratorSpec, mut on_value: F) -> Result<(), DbError>
where
    F: FnMut(&Value),
{
    drive(tx, spec, |pos| {
        on_value(&spec.effective_value(pos.key, pos.primary_key, pos.value));
        Directive::Advance
    })
}

/// Folds the effective values of every position into `initial`.
pub fn reduce<A, F>(
    tx: &dyn Transaction,
    spec: &IteratorSpec,
    mut f: F,
    initial: A,
) -> Result<A, DbError>
where
    F: FnMut(A, &Value) -> A,
{
    let mut acc = Some(initial);
    drive(tx, spec, |pos| {
        let value = spec.effective_value(pos.key, pos.primary_key, pos.value);
        acc = acc.take().map(|prev| f(prev, &value));
        Directive::Advance
    })?;
    acc.ok_or_else(|| DbError::Aborted("reduce lost its accumulator".into()))
}

/// Exposes every position to `on_cursor`, which steers the cursor.
pub fn open<F>(tx: &dyn Transaction, spec: &IteratorSpec, on_cursor: F) -> Result<(), DbError>
where
    F: FnMut(Position<'_>) -> Directive,
{
    drive(tx, spec, on_cursor)
}

/// Runs a compiled native plan: projected records, or the aggregate when
/// the iterator carries one.
pub fn collect(tx: &dyn Transaction, spec: &IteratorSpec) -> Result<QueryResult, DbError> {
    if let Some(aggregate) = spec.reduce() {
        let mut state = aggregate.state();
        drive(tx, spec, |pos| {
            state.update(aggregate, spec.subject(pos.key, pos.primary_key, pos.value));
            Directive::Advance
        })?;
        return Ok(QueryResult::Aggregate(state.finish()));
    }
    let mut records = Vec::new();
    drive(tx, spec, |pos| {
        let subject = spec.subject(pos.key, pos.primary_key, pos.value);
        records.push(match spec.map() {
            Some(projection) => projection.apply(subject),
            None => subject.clone(),
        });
        Directive::Advance
    })?;
    Ok(QueryResult::Records(records))
}

#[cfg(test)]
mod tests {
    use super::{collect, map, reduce, scan};
    use crate::catalog::schema::{DatabaseSchema, IndexSchema, StoreSchema};
    use crate::catalog::types::Value;
    use crate::query::aggregate::Aggregate;
    use crate::query::compiler::QueryResult;
    use crate::query::predicate::{CompareOp, Predicate};
    use crate::scan::directive::Directive;
    use crate::scan::iterator::IteratorSpec;
    use crate::storage::backend::{Backend, Transaction, TransactionMode};
    use crate::storage::memory::MemoryBackend;
    use serde_json::json;

    fn backend() -> MemoryBackend {
        let schema = DatabaseSchema::new(vec![
            StoreSchema::new("st", Some("id")).with_index(IndexSchema::new("value")),
        ]);
        let backend = MemoryBackend::new("db", schema);
        let mut tx = backend
            .open_transaction(&["st".to_string()], TransactionMode::ReadWrite)
            .expect("tx");
        for i in 0..5 {
            tx.put("st", Value::from(json!({"id": format!("k{i}"), "value": 10 - i})), None)
                .expect("put");
        }
        tx.commit().expect("commit");
        backend
    }

    fn read_tx(backend: &MemoryBackend) -> Box<dyn Transaction> {
        backend
            .open_transaction(&["st".to_string()], TransactionMode::ReadOnly)
            .expect("tx")
    }

    #[test]
    fn missing_directives_stop_the_scan() {
        let backend = backend();
        let tx = read_tx(&backend);
        let mut ticks = 0;
        scan(tx.as_ref(), &[IteratorSpec::keys("st")], |_| {
            ticks += 1;
            Vec::new()
        })
        .expect("scan");
        assert_eq!(ticks, 1);
    }

    #[test]
    fn filter_offset_and_limit_apply_before_delivery() {
        let backend = backend();
        let tx = read_tx(&backend);
        let spec = IteratorSpec::values("st")
            .with_filter(Predicate::compare("value", CompareOp::Lt, 10))
            .with_offset(1)
            .with_limit(2);
        let mut seen = Vec::new();
        map(tx.as_ref(), &spec, |record| {
            seen.push(record.get_path("id").cloned().unwrap_or(Value::Null))
        })
        .expect("map");
        assert_eq!(seen, vec![Value::text("k2"), Value::text("k3")]);
    }

    #[test]
    fn seek_must_move_forward() {
        let backend = backend();
        let tx = read_tx(&backend);
        let err = scan(tx.as_ref(), &[IteratorSpec::keys("st")], |_| {
            vec![Directive::SeekTo(Value::text("k0"))]
        })
        .expect_err("seek in place");
        assert_eq!(err.code(), crate::error::DbErrorCode::Argument);
    }

    #[test]
    fn reduce_and_collect_fold_index_scans() {
        let backend = backend();
        let tx = read_tx(&backend);
        let keys = IteratorSpec::index_keys("st", "value");
        let sum = reduce(
            tx.as_ref(),
            &keys,
            |acc, v| acc + if let Value::Integer(i) = v { *i } else { 0 },
            0,
        )
        .expect("reduce");
        assert_eq!(sum, 6 + 7 + 8 + 9 + 10);

        let spec =
            IteratorSpec::index_values("st", "value").with_reduce(Aggregate::Max("id".into()));
        assert_eq!(
            collect(tx.as_ref(), &spec).expect("collect"),
            QueryResult::Aggregate(Value::text("k4"))
        );
    }
}
