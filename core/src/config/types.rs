use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "runwarden_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

/// Execution policy. Keys keep the camelCase names scripts owners already use
/// in their settings files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(default = "default_shell")]
    pub default_shell: String,

    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,

    #[serde(default = "default_max_concurrent_scripts")]
    pub max_concurrent_scripts: usize,

    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    #[serde(default)]
    pub restrict_to_base_path: bool,

    #[serde(default)]
    pub base_path: Option<String>,

    /// Maximum captured output, in characters.
    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,

    #[serde(default = "default_true")]
    pub enable_output_streaming: bool,

    #[serde(default = "default_true")]
    pub enable_progress_tracking: bool,

    #[serde(default)]
    pub auto_save_results: bool,

    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// Wait between the graceful termination request and the forced kill.
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    /// Upper bound for output-driven execution phase progress before exit.
    #[serde(default = "default_output_progress_cap")]
    pub output_progress_cap: f64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default)]
    pub resource_limits: ResourceLimits,

    #[serde(default)]
    pub security_options: SecurityOptions,
}

fn default_shell() -> String {
    if cfg!(windows) {
        "powershell".to_string()
    } else {
        "bash".to_string()
    }
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_max_concurrent_scripts() -> usize {
    5
}

fn default_allowed_extensions() -> Vec<String> {
    [".sh", ".bash", ".zsh", ".ps1", ".py", ".js", ".bat", ".cmd"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_output_length() -> usize {
    1_000_000
}

fn default_true() -> bool {
    true
}

fn default_output_directory() -> String {
    "./script-results".to_string()
}

fn default_termination_grace_ms() -> u64 {
    5_000
}

fn default_output_progress_cap() -> f64 {
    90.0
}

fn default_history_limit() -> usize {
    100
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            default_timeout_seconds: default_timeout_seconds(),
            max_concurrent_scripts: default_max_concurrent_scripts(),
            allowed_extensions: default_allowed_extensions(),
            restrict_to_base_path: false,
            base_path: None,
            max_output_length: default_max_output_length(),
            enable_output_streaming: true,
            enable_progress_tracking: true,
            auto_save_results: false,
            output_directory: default_output_directory(),
            termination_grace_ms: default_termination_grace_ms(),
            output_progress_cap: default_output_progress_cap(),
            history_limit: default_history_limit(),
            resource_limits: ResourceLimits::default(),
            security_options: SecurityOptions::default(),
        }
    }
}

/// Limits handed to the process runner. `None` leaves the OS default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default, rename = "maxMemoryMB")]
    pub max_memory_mb: Option<u64>,

    #[serde(default)]
    pub max_cpu_time_sec: Option<u64>,

    #[serde(default)]
    pub max_file_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityOptions {
    #[serde(default = "default_true")]
    pub enable_sandbox: bool,

    #[serde(default)]
    pub allow_network_access: bool,

    #[serde(default = "default_true")]
    pub allow_file_system_access: bool,

    #[serde(default)]
    pub allow_registry_access: bool,

    #[serde(default = "default_true")]
    pub allow_environment_access: bool,
}

impl Default for SecurityOptions {
    fn default() -> Self {
        Self {
            enable_sandbox: true,
            allow_network_access: false,
            allow_file_system_access: true,
            allow_registry_access: false,
            allow_environment_access: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_true")]
    pub enable_time_estimation: bool,

    #[serde(default = "default_estimation_interval_ms")]
    pub estimation_interval_ms: u64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_concurrent_tasks() -> usize {
    50
}

fn default_estimation_interval_ms() -> u64 {
    1_000
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            history_limit: default_history_limit(),
            enable_time_estimation: true,
            estimation_interval_ms: default_estimation_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}
