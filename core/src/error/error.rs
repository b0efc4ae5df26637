use thiserror::Error;

/// Failures of the process runner layer, below the coordinator.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn process: {0}")]
    Spawn(String),
    #[error("{stream} pipe read failed: {source}")]
    StreamIo {
        stream: &'static str,
        source: std::io::Error,
    },
    /// Session failures reported by a runner plugin.
    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}
