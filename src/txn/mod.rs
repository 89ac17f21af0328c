pub mod request;
pub mod scheduler;

pub use request::{Completion, Request};
pub use scheduler::{Admission, Phase, TransactionScheduler};
