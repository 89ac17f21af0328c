pub mod aggregate;
pub mod compiler;
pub mod plan;
pub mod predicate;
pub mod sql;

pub use aggregate::Aggregate;
pub use compiler::{CompileTarget, CompiledPlan, QueryResult, compile};
pub use plan::{Query, Selection, WhereClause};
pub use predicate::{CompareOp, Predicate, Projection};
pub use sql::{SqlPlan, SqlShape, iterator_to_sql};
