pub mod backend;
pub mod cursor;
pub mod key_range;
pub mod memory;
pub mod relational;

pub use backend::{Backend, BackendFactory, CursorRequest, RowSet, Transaction, TransactionMode};
pub use cursor::{Cursor, CursorEntry, Direction, EntryCursor};
pub use key_range::KeyRange;
pub use memory::{MemoryBackend, MemoryFactory, OpenHandle};
