use thiserror::Error;

/// Progress registry and tracker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Duplicate task ID: {0}")]
    DuplicateTask(String),

    #[error("Too many concurrent tasks (limit {limit})")]
    TooManyTasks { limit: usize },

    #[error("Invalid task definition '{task_id}': {reason}")]
    InvalidDefinition { task_id: String, reason: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task '{0}' already finished")]
    TaskTerminal(String),

    #[error("Unknown phase '{phase_id}' in task '{task_id}'")]
    UnknownPhase { task_id: String, phase_id: String },

    #[error("Phase '{phase_id}' would move task '{task_id}' backwards")]
    PhaseRegression { task_id: String, phase_id: String },

    #[error("Phase '{phase_id}' depends on '{missing}', which has not completed")]
    DependencyNotMet { phase_id: String, missing: String },
}
