use crate::catalog::types::Value;
use smallvec::SmallVec;

/// Per-slot instruction returned by a scan callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Move to the next position.
    Advance,
    /// Move forward to the first position at or past the key in scan direction.
    SeekTo(Value),
    /// Stop this slot for the rest of the scan.
    Stop,
}

pub type Slots = SmallVec<[Option<Value>; 2]>;

/// One synchronized step of a multi-iterator scan. Slot `i` is `None` once
/// the `i`-th iterator is exhausted or stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    pub keys: Slots,
    pub values: Slots,
}

impl Tuple {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key(&self, slot: usize) -> Option<&Value> {
        self.keys.get(slot).and_then(Option::as_ref)
    }

    pub fn value(&self, slot: usize) -> Option<&Value> {
        self.values.get(slot).and_then(Option::as_ref)
    }

    /// Whether no slot holds a position.
    pub fn is_exhausted(&self) -> bool {
        self.keys.iter().all(Option::is_none)
    }
}

static STOP: Directive = Directive::Stop;

/// Directive for `slot`; missing entries stop the slot.
pub(crate) fn directive_for(directives: &[Directive], slot: usize) -> &Directive {
    directives.get(slot).unwrap_or(&STOP)
}
