#[allow(clippy::module_inception)]
pub mod error;
pub mod execution;
pub mod progress;

pub use error::RunnerError;
pub use execution::{ErrorKind, ExecutionError};
pub use progress::ProgressError;
