use std::path::PathBuf;

use serde::Serialize;

use crate::runner::OutputStream;

use super::types::ExecutionResult;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Started {
        id: String,
        script_path: PathBuf,
        shell: String,
    },
    Output {
        id: String,
        stream: OutputStream,
        chunk: String,
    },
    Completed(ExecutionResult),
    Failed(ExecutionResult),
    Cancelled {
        id: String,
        reason: String,
        result: ExecutionResult,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Started { id, .. } | Self::Output { id, .. } | Self::Cancelled { id, .. } => id,
            Self::Completed(r) | Self::Failed(r) => &r.id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed(_) | Self::Failed(_) | Self::Cancelled { .. }
        )
    }
}
