mod abort;
pub mod exit;
mod io_pump;
mod runtime;
mod traits;
pub mod types;

pub use runtime::{run_process, RunProcessInput};
pub use traits::{RunnerPlugin, RunnerSession};
pub use types::{
    OutputChunk, OutputSink, OutputStream, RunOutcome, RunStatus, RunnerStartArgs, Signal,
};
