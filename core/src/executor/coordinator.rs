use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{ExecutionConfig, ProgressConfig};
use crate::error::{ExecutionError, RunnerError};
use crate::fs::FileSystem;
use crate::progress::{Phase, ProgressRegistry, ProgressUpdate, TaskDefinition, Tracker};
use crate::runner::{
    run_process, OutputChunk, OutputSink, OutputStream, RunOutcome, RunProcessInput, RunStatus,
    RunnerPlugin, RunnerStartArgs,
};
use crate::security::{self, SecurityResult};
use crate::shell;
use crate::util::{generate_execution_id, truncate_chars};

use super::events::ExecutionEvent;
use super::handle::ExecutionHandle;
use super::params;
use super::persist;
use super::types::{
    CancelToken, ExecutionResult, FailureKind, OutputCallback, ProgressCallback,
    RunningExecutionInfo, ScriptOptions,
};
use super::validate;

/// Variables that survive the environment wipe of a sandboxed run.
const SANDBOX_ENV_PASSTHROUGH: &[&str] = &["PATH", "HOME", "TEMP", "TMP", "SystemRoot"];

/// The tracker deadline only backs up the runner timeout, which starts later
/// and also needs time to kill, reap and drain.
const TRACKER_DEADLINE_MARGIN: Duration = Duration::from_secs(10);

const EXECUTION_EVENT_CAPACITY: usize = 256;
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// Runs scripts under the configured policy. Cheap to clone; clones share
/// the running set, history and event channel.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: ExecutionConfig,
    runner: Arc<dyn RunnerPlugin>,
    fs: Arc<dyn FileSystem>,
    progress: ProgressRegistry,
    state: Mutex<ExecState>,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

#[derive(Default)]
struct ExecState {
    /// Ids holding a capacity slot. A cancelled execution gives its slot back
    /// together with its running entry.
    reserved: HashSet<String>,
    running: HashMap<String, RunningExecution>,
    history: VecDeque<ExecutionResult>,
}

struct RunningExecution {
    info: RunningExecutionInfo,
    cancel_tx: Arc<watch::Sender<Option<String>>>,
}

impl CoordinatorInner {
    fn lock(&self) -> MutexGuard<'_, ExecState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one capacity slot. Dropping it frees the slot and forgets the
/// running entry, whatever path the execution took.
struct SlotGuard {
    inner: Arc<CoordinatorInner>,
    id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.reserved.remove(&self.id);
        state.running.remove(&self.id);
    }
}

/// Validated, ready-to-spawn execution.
struct Prepared {
    script_path: PathBuf,
    shell: String,
    args: RunnerStartArgs,
}

impl Coordinator {
    pub fn new(
        config: ExecutionConfig,
        progress_config: ProgressConfig,
        runner: Arc<dyn RunnerPlugin>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(progress_config.event_channel_capacity.max(1));
        let progress = ProgressRegistry::new(progress_config);
        if config.enable_progress_tracking {
            progress.start_estimator();
        }
        tracing::debug!(
            runner = runner.name(),
            max_concurrent = config.max_concurrent_scripts,
            "coordinator ready"
        );
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                runner,
                fs,
                progress,
                state: Mutex::new(ExecState::default()),
                event_tx,
            }),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.inner.progress
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn running(&self) -> Vec<RunningExecutionInfo> {
        let state = self.inner.lock();
        let mut out: Vec<RunningExecutionInfo> =
            state.running.values().map(|r| r.info.clone()).collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        out
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running.len()
    }

    /// Finished executions, oldest first.
    pub fn history(&self) -> Vec<ExecutionResult> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Run a script to completion.
    pub async fn execute_script(
        &self,
        path: impl AsRef<Path>,
        options: ScriptOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.spawn_script(path, options).await?.wait().await
    }

    /// Validate, screen and start a script. Errors are only returned for
    /// problems found before a process exists; everything after that ends up
    /// in the `ExecutionResult`.
    pub async fn spawn_script(
        &self,
        path: impl AsRef<Path>,
        options: ScriptOptions,
    ) -> Result<ExecutionHandle, ExecutionError> {
        let path = path.as_ref();
        let id = generate_execution_id();
        let guard = self.reserve_slot(&id)?;

        let prepared = self.prepare(path, &options).await.inspect_err(|e| {
            tracing::warn!(
                error.kind = "execution.rejected",
                execution_id = %id,
                script = %path.display(),
                error.message = %e
            );
        })?;

        let timeout = options
            .timeout
            .unwrap_or(Duration::from_secs(self.inner.config.default_timeout_seconds));
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let tracker = self.start_tracker(&id, &prepared.script_path, timeout);

        let (cancel_tx, cancel_rx) = watch::channel(None);
        let cancel_tx = Arc::new(cancel_tx);
        let start_time = Utc::now();
        {
            let mut state = self.inner.lock();
            state.running.insert(
                id.clone(),
                RunningExecution {
                    info: RunningExecutionInfo {
                        id: id.clone(),
                        script_path: prepared.script_path.clone(),
                        shell: prepared.shell.clone(),
                        start_time,
                        tracker_id: tracker.as_ref().map(|t| t.id().to_string()),
                        pid: None,
                    },
                    cancel_tx: cancel_tx.clone(),
                },
            );
        }

        let forwarder = options
            .cancel_token
            .clone()
            .map(|token| self.spawn_cancel_forwarder(id.clone(), token));

        let (exec_tx, _) = broadcast::channel(EXECUTION_EVENT_CAPACITY);
        let sink = ExecutionSink::new(
            &id,
            &self.inner.config,
            &options,
            tracker.clone(),
            self.inner.event_tx.clone(),
            exec_tx.clone(),
        );

        let job = ExecutionJob {
            id: id.clone(),
            prepared,
            parameters: options.parameters.clone(),
            timeout,
            stdin: options.stdin.clone(),
            start_time,
            tracker,
            cancel_rx,
            _cancel_tx: cancel_tx,
            forwarder,
            sink,
            exec_tx: exec_tx.clone(),
        };
        let task = tokio::spawn(job.run(self.inner.clone(), guard));

        Ok(ExecutionHandle::new(id, self.clone(), exec_tx, task))
    }

    pub fn cancel_script(&self, id: &str) -> bool {
        self.cancel_script_with_reason(id, "Cancelled by user")
    }

    /// Signal cancellation and forget the running entry. The execution task
    /// still produces its own result once the process is gone.
    pub fn cancel_script_with_reason(&self, id: &str, reason: &str) -> bool {
        let entry = {
            let mut state = self.inner.lock();
            let entry = state.running.remove(id);
            if entry.is_some() {
                state.reserved.remove(id);
            }
            entry
        };
        let Some(entry) = entry else {
            return false;
        };

        entry.cancel_tx.send_replace(Some(reason.to_string()));
        if let Some(tracker) = entry
            .info
            .tracker_id
            .as_deref()
            .and_then(|tid| self.inner.progress.tracker(tid))
        {
            tracker.cancel(reason);
        }
        tracing::info!(execution_id = %id, reason = %reason, "execution cancellation requested");
        true
    }

    /// Screen a script without running it.
    pub async fn validate_script_security(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<SecurityResult, ExecutionError> {
        let cfg = &self.inner.config;
        let script_path =
            validate::validate_script_path(cfg, self.inner.fs.as_ref(), path.as_ref()).await?;
        let content = self.inner.fs.read_to_string(&script_path).await?;
        Ok(security::screen(&content, &cfg.security_options))
    }

    pub fn screen_content(&self, content: &str) -> SecurityResult {
        security::screen(content, &self.inner.config.security_options)
    }

    /// Cancel every running execution, stop the estimator and clear history.
    pub fn cleanup(&self) {
        let ids: Vec<String> = self.inner.lock().running.keys().cloned().collect();
        for id in &ids {
            self.cancel_script_with_reason(id, "Coordinator cleanup");
        }
        self.inner.progress.stop_estimator();
        self.inner.lock().history.clear();
        tracing::debug!(cancelled = ids.len(), "coordinator cleaned up");
    }

    fn reserve_slot(&self, id: &str) -> Result<SlotGuard, ExecutionError> {
        let limit = self.inner.config.max_concurrent_scripts;
        let mut state = self.inner.lock();
        if state.reserved.len() >= limit {
            tracing::warn!(error.kind = "execution.capacity", limit, "too many running scripts");
            return Err(ExecutionError::CapacityExceeded { limit });
        }
        state.reserved.insert(id.to_string());
        Ok(SlotGuard {
            inner: self.inner.clone(),
            id: id.to_string(),
        })
    }

    async fn prepare(&self, path: &Path, options: &ScriptOptions) -> Result<Prepared, ExecutionError> {
        let cfg = &self.inner.config;
        let fs = self.inner.fs.as_ref();

        let script_path = validate::validate_script_path(cfg, fs, path).await?;

        let content = fs.read_to_string(&script_path).await?;
        let report = security::screen(&content, &cfg.security_options);
        if !report.safe {
            return Err(ExecutionError::SecurityViolation {
                issues: report.issues,
            });
        }

        if let Some(schema) = &options.parameter_schema {
            params::validate_parameters(schema, &options.parameters)?;
        }

        let requested = options.shell.as_deref().unwrap_or(&cfg.default_shell);
        let builder = shell::builder_for(requested)
            .ok_or_else(|| ExecutionError::UnsupportedShell(requested.to_string()))?;
        let command = builder.build(&script_path, &options.parameters);

        let cwd = options
            .working_directory
            .clone()
            .or_else(|| script_path.parent().map(Path::to_path_buf));

        let sandbox = cfg.security_options.enable_sandbox;
        let mut envs: HashMap<String, String> = if sandbox {
            SANDBOX_ENV_PASSTHROUGH
                .iter()
                .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
                .collect()
        } else {
            HashMap::new()
        };
        envs.extend(options.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(Prepared {
            script_path,
            shell: builder.shell().to_string(),
            args: RunnerStartArgs {
                program: command.program,
                args: command.args,
                cwd,
                envs,
                clear_env: sandbox,
                limits: if sandbox {
                    cfg.resource_limits.clone()
                } else {
                    Default::default()
                },
            },
        })
    }

    fn start_tracker(&self, id: &str, script_path: &Path, timeout: Option<Duration>) -> Option<Tracker> {
        if !self.inner.config.enable_progress_tracking {
            return None;
        }
        let name = script_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| script_path.display().to_string());
        let mut def = TaskDefinition::new(
            id,
            format!("Execute {name}"),
            vec![
                Phase::new("preparation", "Preparation", 10.0),
                Phase::new("execution", "Execution", 80.0).depends_on("preparation"),
                Phase::new("cleanup", "Cleanup", 10.0).depends_on("execution"),
            ],
        );
        def.timeout = timeout.map(|t| t + TRACKER_DEADLINE_MARGIN);
        def.metadata
            .insert("scriptPath".into(), json!(script_path.display().to_string()));

        let tracker = match self.inner.progress.create_progress(def) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error.kind = "progress.create_failed", execution_id = %id, error.message = %e);
                return None;
            }
        };
        let entered = tracker
            .update_progress(ProgressUpdate::absolute(100.0).with_message("Validated"))
            .and_then(|_| {
                tracker.set_phase(
                    "execution",
                    Some(ProgressUpdate::absolute(0.0).with_message("Running")),
                )
            });
        if let Err(e) = entered {
            tracing::warn!(error.kind = "progress.update_failed", execution_id = %id, error.message = %e);
        }
        Some(tracker)
    }

    fn spawn_cancel_forwarder(&self, id: String, token: CancelToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut rx = token.subscribe();
            loop {
                let reason = rx.borrow_and_update().clone();
                if let Some(reason) = reason {
                    coordinator.cancel_script_with_reason(&id, &reason);
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Everything the execution task owns once spawn-time checks passed.
struct ExecutionJob {
    id: String,
    prepared: Prepared,
    parameters: std::collections::BTreeMap<String, serde_json::Value>,
    timeout: Option<Duration>,
    stdin: Option<String>,
    start_time: DateTime<Utc>,
    tracker: Option<Tracker>,
    cancel_rx: watch::Receiver<Option<String>>,
    /// Keeps the cancel channel open after the running entry is removed.
    _cancel_tx: Arc<watch::Sender<Option<String>>>,
    forwarder: Option<JoinHandle<()>>,
    sink: ExecutionSink,
    exec_tx: broadcast::Sender<ExecutionEvent>,
}

impl ExecutionJob {
    async fn run(mut self, inner: Arc<CoordinatorInner>, guard: SlotGuard) -> ExecutionResult {
        let cfg = &inner.config;
        tracing::info!(
            execution_id = %self.id,
            script = %self.prepared.script_path.display(),
            shell = %self.prepared.shell,
            "execution started"
        );
        self.emit(
            &inner,
            ExecutionEvent::Started {
                id: self.id.clone(),
                script_path: self.prepared.script_path.clone(),
                shell: self.prepared.shell.clone(),
            },
        );

        let outcome = match inner.runner.start_session(&self.prepared.args).await {
            Ok(session) => {
                let pid = session.pid();
                if let Some(entry) = inner.lock().running.get_mut(&self.id) {
                    entry.info.pid = pid;
                }
                let input = RunProcessInput {
                    session,
                    timeout: self.timeout,
                    cancel_rx: self.cancel_rx.clone(),
                    termination_grace: Duration::from_millis(cfg.termination_grace_ms),
                    stdin_payload: self.stdin.take(),
                    chunk_channel_capacity: CHUNK_CHANNEL_CAPACITY,
                };
                run_process(input, &mut self.sink).await
            }
            Err(e) => {
                tracing::error!(
                    error.kind = "runner.spawn_failed",
                    execution_id = %self.id,
                    program = %self.prepared.args.program,
                    error.message = %e
                );
                RunOutcome::spawn_failed(RunnerError::Spawn(e.to_string()).to_string())
            }
        };

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }

        let result = self.build_result(cfg.max_output_length, &outcome);

        if cfg.auto_save_results {
            let dir = Path::new(&cfg.output_directory);
            match persist::save_result(inner.fs.as_ref(), dir, &result).await {
                Ok(path) => tracing::debug!(execution_id = %self.id, path = %path.display(), "result saved"),
                Err(e) => tracing::warn!(
                    error.kind = "persist.failed",
                    execution_id = %self.id,
                    error.message = %e
                ),
            }
        }

        {
            let mut state = inner.lock();
            state.history.push_back(result.clone());
            while state.history.len() > cfg.history_limit {
                state.history.pop_front();
            }
        }

        if let Some(tracker) = &self.tracker {
            match result.failure_kind {
                Some(FailureKind::Cancelled) => {
                    tracker.cancel(result.error.as_deref().unwrap_or("cancelled"));
                }
                _ => {
                    // best effort: the tracker may already have hit its deadline
                    let _ = tracker.set_phase("cleanup", None);
                    if result.success {
                        tracker.complete(Some("Script completed"));
                    } else {
                        tracker.fail(result.error.as_deref().unwrap_or("Script failed"));
                    }
                }
            }
            if let (Some(cb), Some(state)) = (&self.sink.on_progress, tracker.state()) {
                cb(&state);
            }
        }

        tracing::info!(
            execution_id = %self.id,
            success = result.success,
            exit_code = ?result.exit_code,
            failure = ?result.failure_kind,
            duration_ms = result.duration_ms,
            "execution finished"
        );

        let event = match (result.failure_kind, &outcome.cancel_reason) {
            (Some(FailureKind::Cancelled), reason) => ExecutionEvent::Cancelled {
                id: self.id.clone(),
                reason: reason.clone().unwrap_or_default(),
                result: result.clone(),
            },
            _ if result.success => ExecutionEvent::Completed(result.clone()),
            _ => ExecutionEvent::Failed(result.clone()),
        };
        self.emit(&inner, event);

        drop(guard);
        result
    }

    fn emit(&self, inner: &CoordinatorInner, event: ExecutionEvent) {
        let _ = self.exec_tx.send(event.clone());
        let _ = inner.event_tx.send(event);
    }

    fn build_result(&self, max_output_length: usize, outcome: &RunOutcome) -> ExecutionResult {
        let (output, truncated) = truncate_chars(&self.sink.stdout, max_output_length);
        let (stderr, _) = truncate_chars(&self.sink.stderr, max_output_length);

        let (success, failure_kind, error) = match outcome.status {
            RunStatus::Completed if outcome.exit_code == Some(0) => (true, None, None),
            RunStatus::Completed => {
                let error = match (outcome.exit_code, &outcome.error) {
                    (_, Some(e)) => e.clone(),
                    (Some(code), None) => {
                        let trimmed = stderr.trim();
                        if trimmed.is_empty() {
                            format!("Process exited with code {code}")
                        } else {
                            trimmed.to_string()
                        }
                    }
                    (None, None) => "Process exited without an exit code".to_string(),
                };
                (false, Some(FailureKind::NonZeroExit), Some(error))
            }
            RunStatus::TimedOut => {
                let ms = self.timeout.map(|t| t.as_millis()).unwrap_or_default();
                (
                    false,
                    Some(FailureKind::Timeout),
                    Some(format!("Script execution timed out after {ms}ms")),
                )
            }
            RunStatus::Cancelled => {
                let reason = outcome.cancel_reason.as_deref().unwrap_or("cancelled");
                (
                    false,
                    Some(FailureKind::Cancelled),
                    Some(format!("Script execution was cancelled: {reason}")),
                )
            }
            RunStatus::SpawnFailed => (
                false,
                Some(FailureKind::SpawnFailed),
                outcome.error.clone().or_else(|| Some("Failed to spawn process".to_string())),
            ),
        };

        ExecutionResult {
            id: self.id.clone(),
            success,
            output,
            stderr,
            error,
            failure_kind,
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
            script_path: self.prepared.script_path.clone(),
            parameters: self.parameters.clone(),
            shell: self.prepared.shell.clone(),
            working_directory: self.prepared.args.cwd.clone().unwrap_or_default(),
            start_time: self.start_time,
            end_time: Utc::now(),
            output_length: self.sink.stdout_chars,
            truncated,
        }
    }
}

/// Accumulates output in delivery order, fans it out to callbacks and
/// subscribers, and turns output volume into execution-phase progress.
struct ExecutionSink {
    id: String,
    /// Buffers keep at most `max_output_length + 1` characters, enough to
    /// know truncation happened.
    keep_chars: usize,
    max_output_length: usize,
    stdout: String,
    stderr: String,
    stdout_chars: usize,
    stderr_chars: usize,
    on_output: Option<OutputCallback>,
    on_error: Option<OutputCallback>,
    on_progress: Option<ProgressCallback>,
    stream_events: bool,
    event_tx: broadcast::Sender<ExecutionEvent>,
    exec_tx: broadcast::Sender<ExecutionEvent>,
    tracker: Option<Tracker>,
    progress_cap: f64,
    reported: f64,
}

impl ExecutionSink {
    fn new(
        id: &str,
        cfg: &ExecutionConfig,
        options: &ScriptOptions,
        tracker: Option<Tracker>,
        event_tx: broadcast::Sender<ExecutionEvent>,
        exec_tx: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            id: id.to_string(),
            keep_chars: cfg.max_output_length.saturating_add(1),
            max_output_length: cfg.max_output_length,
            stdout: String::new(),
            stderr: String::new(),
            stdout_chars: 0,
            stderr_chars: 0,
            on_output: options.on_output.clone(),
            on_error: options.on_error.clone(),
            on_progress: options.on_progress.clone(),
            stream_events: cfg.enable_output_streaming,
            event_tx,
            exec_tx,
            tracker,
            progress_cap: cfg.output_progress_cap.clamp(0.0, 100.0),
            reported: 0.0,
        }
    }

    fn output_progress(&self) -> f64 {
        if self.max_output_length == 0 {
            return self.progress_cap;
        }
        let ratio = self.stdout_chars as f64 / self.max_output_length as f64;
        (ratio * self.progress_cap).min(self.progress_cap)
    }

    fn report_progress(&mut self) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let p = self.output_progress();
        // one update per whole percent keeps the event rate bounded
        if p.floor() <= self.reported.floor() {
            return;
        }
        self.reported = p;
        match tracker.update_progress(ProgressUpdate::absolute(p)) {
            Ok(state) => {
                if let Some(cb) = &self.on_progress {
                    cb(&state);
                }
            }
            Err(e) => tracing::debug!(execution_id = %self.id, error.message = %e, "progress update skipped"),
        }
    }
}

fn append_bounded(buf: &mut String, total: &mut usize, text: &str, keep: usize) {
    let kept = (*total).min(keep);
    let room = keep - kept;
    if room > 0 {
        match text.char_indices().nth(room) {
            Some((cut, _)) => buf.push_str(&text[..cut]),
            None => buf.push_str(text),
        }
    }
    *total += text.chars().count();
}

impl OutputSink for ExecutionSink {
    fn on_chunk(&mut self, chunk: OutputChunk) {
        match chunk.stream {
            OutputStream::Stdout => {
                append_bounded(&mut self.stdout, &mut self.stdout_chars, &chunk.text, self.keep_chars);
                if let Some(cb) = &self.on_output {
                    cb(&chunk.text);
                }
            }
            OutputStream::Stderr => {
                append_bounded(&mut self.stderr, &mut self.stderr_chars, &chunk.text, self.keep_chars);
                if let Some(cb) = &self.on_error {
                    cb(&chunk.text);
                }
            }
        }

        if self.stream_events {
            let event = ExecutionEvent::Output {
                id: self.id.clone(),
                stream: chunk.stream,
                chunk: chunk.text,
            };
            let _ = self.exec_tx.send(event.clone());
            let _ = self.event_tx.send(event);
        }

        if chunk.stream == OutputStream::Stdout {
            self.report_progress();
        }
    }
}
