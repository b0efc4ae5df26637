use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A weighted segment of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub name: String,
    pub weight: f64,
    /// Phase ids that must be finished before this one is entered.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Phase {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, phase_id: impl Into<String>) -> Self {
        self.dependencies.push(phase_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    pub phases: Vec<Phase>,
    /// Fails the task if it is still active when this elapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phases,
            timeout: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn total_weight(&self) -> f64 {
        self.phases.iter().map(|p| p.weight).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub id: String,
    pub name: String,
    pub status: ProgressStatus,
    pub current_phase: Option<String>,
    pub current_phase_index: usize,
    pub total_phases: usize,
    /// Weighted completion of the whole task, 0..=100.
    pub overall_progress: f64,
    /// Completion of the current phase, 0..=100.
    pub phase_progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub estimated_end_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub parent_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl ProgressState {
    pub(crate) fn pending(def: &TaskDefinition, parent_id: Option<String>) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            status: ProgressStatus::Pending,
            current_phase: def.phases.first().map(|p| p.id.clone()),
            current_phase_index: 0,
            total_phases: def.phases.len(),
            overall_progress: 0.0,
            phase_progress: 0.0,
            start_time: None,
            end_time: None,
            estimated_end_time: None,
            message: None,
            error: None,
            parent_id,
            metadata: def.metadata.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    #[default]
    Absolute,
    Increment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percentage: f64,
    #[serde(default)]
    pub mode: UpdateMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl ProgressUpdate {
    pub fn absolute(percentage: f64) -> Self {
        Self {
            percentage,
            mode: UpdateMode::Absolute,
            ..Default::default()
        }
    }

    pub fn increment(percentage: f64) -> Self {
        Self {
            percentage,
            mode: UpdateMode::Increment,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Created(ProgressState),
    Progress(ProgressState),
    PhaseChanged {
        previous: Option<String>,
        state: ProgressState,
    },
    Completed(ProgressState),
    Failed(ProgressState),
    Cancelled(ProgressState),
}

impl ProgressEvent {
    pub fn state(&self) -> &ProgressState {
        match self {
            Self::Created(s)
            | Self::Progress(s)
            | Self::Completed(s)
            | Self::Failed(s)
            | Self::Cancelled(s) => s,
            Self::PhaseChanged { state, .. } => state,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.state().id
    }
}
