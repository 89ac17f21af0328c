pub mod schema;
pub mod types;

pub use schema::{DatabaseSchema, IndexSchema, StoreSchema};
pub use types::{Record, Row, Value};
