//! runwarden core: screened, bounded and observable execution of external scripts.
//!
//! ```text
//! Coordinator::execute_script(path, options)
//!   ↓ reserve capacity slot
//!   ↓ validate path (extension, base path, size)
//!   ↓ security::screen(content)
//!   ↓ validate parameters, shell::builder_for(shell).build(..)
//!   ↓ ProgressRegistry::create_progress(preparation/execution/cleanup)
//!   ↓ runner::run_process(session, sink) → RunOutcome
//!   ↓ finalize → ExecutionResult (persist, history, events)
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod fs;
pub mod progress;
pub mod runner;
pub mod security;
pub mod shell;
pub mod util;

pub use config::{AppConfig, ExecutionConfig, ProgressConfig};
pub use error::{ExecutionError, ProgressError, RunnerError};
pub use executor::{
    Coordinator, ExecutionEvent, ExecutionHandle, ExecutionResult, FailureKind, ScriptOptions,
};
pub use progress::{ProgressRegistry, ProgressState, TaskDefinition, Tracker};
pub use security::{SecurityIssue, SecurityResult};
