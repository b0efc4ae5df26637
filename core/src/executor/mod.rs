//! Execution coordinator: capacity, path policy, screening, parameter
//! checks, command construction, output capture and result bookkeeping.
//!
//! ```text
//! spawn_script(path, options)
//!   ↓ reserve slot          → CapacityExceeded
//!   ↓ validate path         → Validation
//!   ↓ read + screen         → SecurityViolation
//!   ↓ parameters, builder   → InvalidParameter / UnsupportedShell
//!   ↓ tracker (preparation → execution)
//!   ↓ tokio::spawn(run_process → finalize)
//! ExecutionHandle ──wait──→ ExecutionResult
//! ```

mod coordinator;
mod events;
mod handle;
pub mod params;
pub mod persist;
mod types;
pub mod validate;

pub use coordinator::Coordinator;
pub use events::ExecutionEvent;
pub use handle::ExecutionHandle;
pub use types::{
    CancelToken, ExecutionResult, FailureKind, OutputCallback, ParameterDef, ParameterType,
    ProgressCallback, RunningExecutionInfo, ScriptOptions,
};
