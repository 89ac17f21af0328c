pub mod directive;
pub mod engine;
pub mod iterator;

pub use directive::{Directive, Tuple};
pub use engine::Position;
pub use iterator::{CursorState, IterKind, IteratorSpec};
