use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ResourceLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Kill,
    Term,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerStartArgs {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: HashMap<String, String>,
    /// Start from an empty environment; only `envs` reach the child.
    pub clear_env: bool,
    pub limits: ResourceLimits,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    TimedOut,
    Cancelled,
    SpawnFailed,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub cancel_reason: Option<String>,
    /// Spawn or wait failure text.
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn spawn_failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::SpawnFailed,
            exit_code: None,
            duration_ms: 0,
            cancel_reason: None,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Receives output in the order the pumps deliver it.
pub trait OutputSink: Send {
    fn on_chunk(&mut self, chunk: OutputChunk);
}
