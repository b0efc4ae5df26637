//! Weighted, phase-based progress tracking with nested subtasks.

pub mod calc;
mod estimator;
mod registry;
mod tracker;
pub mod types;

pub use estimator::estimate_end;
pub use registry::ProgressRegistry;
pub use tracker::Tracker;
pub use types::{
    Phase, ProgressEvent, ProgressState, ProgressStatus, ProgressUpdate, TaskDefinition, UpdateMode,
};
