use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::progress::ProgressState;

pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(&ProgressState) + Send + Sync>;

/// Per-call execution options. Everything left unset falls back to
/// `ExecutionConfig`.
#[derive(Clone, Default)]
pub struct ScriptOptions {
    pub shell: Option<String>,
    /// Defaults to the script's directory.
    pub working_directory: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub parameters: BTreeMap<String, Value>,
    pub parameter_schema: Option<Vec<ParameterDef>>,
    pub stdin: Option<String>,
    pub cancel_token: Option<CancelToken>,
    pub on_output: Option<OutputCallback>,
    pub on_error: Option<OutputCallback>,
    pub on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for ScriptOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptOptions")
            .field("shell", &self.shell)
            .field("working_directory", &self.working_directory)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("parameters", &self.parameters)
            .field("parameter_schema", &self.parameter_schema)
            .field("stdin", &self.stdin.as_ref().map(|s| s.len()))
            .field("cancel_token", &self.cancel_token.is_some())
            .finish_non_exhaustive()
    }
}

impl ScriptOptions {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Cancellation signal a caller can hand to an execution before it starts.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.tx.send_replace(Some(reason.into()));
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Declared script parameter and its constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ParameterDef {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            pattern: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            allowed: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Cancelled,
    NonZeroExit,
    SpawnFailed,
}

/// Final record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: String,
    pub success: bool,
    pub output: String,
    pub stderr: String,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub script_path: PathBuf,
    pub parameters: BTreeMap<String, Value>,
    pub shell: String,
    pub working_directory: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Character count of stdout before truncation.
    pub output_length: usize,
    pub truncated: bool,
}

/// Snapshot of an execution that has not finished yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningExecutionInfo {
    pub id: String,
    pub script_path: PathBuf,
    pub shell: String,
    pub start_time: DateTime<Utc>,
    pub tracker_id: Option<String>,
    pub pid: Option<u32>,
}
