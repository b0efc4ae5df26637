//! Owns every tracker's state. All mutation happens under one lock and the
//! resulting events are broadcast after it is released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ProgressConfig;
use crate::error::ProgressError;

use super::calc;
use super::estimator;
use super::tracker::Tracker;
use super::types::{Phase, ProgressEvent, ProgressState, ProgressStatus, ProgressUpdate, TaskDefinition};

/// Registry of progress trackers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressRegistry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    config: ProgressConfig,
    table: Mutex<TaskTable>,
    event_tx: broadcast::Sender<ProgressEvent>,
    estimator: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct TaskTable {
    active: HashMap<String, TaskEntry>,
    history: VecDeque<ProgressState>,
}

struct TaskEntry {
    state: ProgressState,
    weights: Vec<f64>,
    phase_ids: Vec<String>,
    dependencies: Vec<Vec<String>>,
    subtasks: Vec<String>,
    subtask_progress: HashMap<String, f64>,
    deadline: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn new(def: &TaskDefinition, parent_id: Option<String>) -> Self {
        Self {
            state: ProgressState::pending(def, parent_id),
            weights: def.phases.iter().map(|p| p.weight).collect(),
            phase_ids: def.phases.iter().map(|p| p.id.clone()).collect(),
            dependencies: def.phases.iter().map(|p| p.dependencies.clone()).collect(),
            subtasks: Vec::new(),
            subtask_progress: HashMap::new(),
            deadline: None,
        }
    }

    fn recompute(&mut self) {
        let subs: Vec<f64> = self
            .subtasks
            .iter()
            .map(|id| self.subtask_progress.get(id).copied().unwrap_or(0.0))
            .collect();
        self.state.overall_progress = calc::overall_progress(
            &self.weights,
            self.state.current_phase_index,
            self.state.phase_progress,
            &subs,
        );
    }

    fn start_if_pending(&mut self, now: DateTime<Utc>) {
        if self.state.status == ProgressStatus::Pending {
            self.state.status = ProgressStatus::Running;
            self.state.start_time = Some(now);
        }
    }

    fn apply(&mut self, update: &ProgressUpdate) {
        self.state.phase_progress = calc::apply_update(self.state.phase_progress, update);
        if let Some(msg) = &update.message {
            self.state.message = Some(msg.clone());
        }
        if let Some(meta) = &update.metadata {
            self.state
                .metadata
                .extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.recompute();
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Terminal {
    Complete(Option<String>),
    Fail(String),
    Cancel(String),
}

impl ProgressRegistry {
    pub fn new(config: ProgressConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                config,
                table: Mutex::new(TaskTable::default()),
                event_tx,
                estimator: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.inner.config
    }

    /// Register a new top-level task. Arms its deadline when the definition
    /// carries a timeout; that needs a running tokio runtime.
    pub fn create_progress(&self, def: TaskDefinition) -> Result<Tracker, ProgressError> {
        let state = self.inner.create(def, None)?;
        Ok(Tracker::new(state.id, self.inner.clone()))
    }

    /// Handle to an active task.
    pub fn tracker(&self, id: &str) -> Option<Tracker> {
        let table = self.inner.lock();
        table
            .active
            .contains_key(id)
            .then(|| Tracker::new(id.to_string(), self.inner.clone()))
    }

    /// Active state if present, otherwise the most recent history entry.
    pub fn get(&self, id: &str) -> Option<ProgressState> {
        self.inner.get(id)
    }

    pub fn active(&self) -> Vec<ProgressState> {
        let table = self.inner.lock();
        let mut out: Vec<ProgressState> = table.active.values().map(|e| e.state.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Finished tasks, oldest first.
    pub fn history(&self) -> Vec<ProgressState> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Spawn the periodic end-time estimator. No-op when already running or
    /// when time estimation is disabled.
    pub fn start_estimator(&self) {
        if !self.inner.config.enable_time_estimation {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!("no async runtime; progress estimator not started");
            return;
        }
        let mut slot = self
            .inner
            .estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let interval = std::time::Duration::from_millis(self.inner.config.estimation_interval_ms.max(1));
        *slot = Some(estimator::spawn(Arc::downgrade(&self.inner), interval));
    }

    pub fn stop_estimator(&self) {
        let handle = self
            .inner
            .estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(h) = handle {
            h.abort();
        }
    }

    pub fn estimator_running(&self) -> bool {
        self.inner
            .estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the estimator and cancel every active task.
    pub fn shutdown(&self) {
        self.stop_estimator();
        let ids: Vec<String> = {
            let table = self.inner.lock();
            table
                .active
                .values()
                .filter(|e| e.state.parent_id.is_none())
                .map(|e| e.state.id.clone())
                .collect()
        };
        for id in ids {
            self.inner
                .finish(&id, Terminal::Cancel("registry shutdown".to_string()));
        }
    }
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<ProgressEvent>) {
        for ev in events {
            // no subscribers is fine
            let _ = self.event_tx.send(ev);
        }
    }

    fn validate(&self, def: &TaskDefinition) -> Result<(), ProgressError> {
        let invalid = |reason: &str| ProgressError::InvalidDefinition {
            task_id: def.id.clone(),
            reason: reason.to_string(),
        };
        if def.id.trim().is_empty() {
            return Err(invalid("task id must not be empty"));
        }
        if def.phases.is_empty() {
            return Err(invalid("at least one phase is required"));
        }
        if def.phases.iter().any(|p| !p.weight.is_finite() || p.weight < 0.0) {
            return Err(invalid("phase weights must be finite and non-negative"));
        }
        if def.total_weight() <= 0.0 {
            return Err(invalid("total phase weight must be positive"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = def.phases.iter().find(|p| !seen.insert(p.id.as_str())) {
            return Err(invalid(&format!("duplicate phase id '{}'", dup.id)));
        }
        Ok(())
    }

    pub(crate) fn create(
        self: &Arc<Self>,
        def: TaskDefinition,
        parent_id: Option<String>,
    ) -> Result<ProgressState, ProgressError> {
        self.validate(&def)?;

        let mut events = Vec::new();
        let state = {
            let mut table = self.lock();
            if table.active.contains_key(&def.id) {
                return Err(ProgressError::DuplicateTask(def.id));
            }
            if parent_id.is_none() {
                let top_level = table
                    .active
                    .values()
                    .filter(|e| e.state.parent_id.is_none())
                    .count();
                if top_level >= self.config.max_concurrent_tasks {
                    return Err(ProgressError::TooManyTasks {
                        limit: self.config.max_concurrent_tasks,
                    });
                }
            }

            let mut entry = TaskEntry::new(&def, parent_id.clone());
            if let Some(timeout) = def.timeout {
                entry.deadline = self.arm_deadline(&def.id, timeout);
            }
            let state = entry.state.clone();
            table.active.insert(def.id.clone(), entry);
            events.push(ProgressEvent::Created(state.clone()));

            if let Some(pid) = &parent_id {
                if let Some(parent) = table.active.get_mut(pid) {
                    parent.subtasks.push(def.id.clone());
                    parent.subtask_progress.insert(def.id.clone(), 0.0);
                    parent.recompute();
                    events.push(ProgressEvent::Progress(parent.state.clone()));
                }
            }
            state
        };

        tracing::debug!(task_id = %state.id, phases = state.total_phases, "progress task created");
        self.emit(events);
        Ok(state)
    }

    fn arm_deadline(self: &Arc<Self>, id: &str, timeout: std::time::Duration) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                tracing::warn!(task_id = %id, "no async runtime; task deadline not armed");
                return None;
            }
        };
        let weak = Arc::downgrade(self);
        let id = id.to_string();
        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                let msg = format!("Task timed out after {}ms", timeout.as_millis());
                if inner.finish(&id, Terminal::Fail(msg)) {
                    tracing::warn!(error.kind = "progress.deadline", task_id = %id);
                }
            }
        }))
    }

    pub(crate) fn add_sub_task(
        self: &Arc<Self>,
        parent_id: &str,
        sub_id: &str,
        name: &str,
        weight: f64,
    ) -> Result<ProgressState, ProgressError> {
        self.require_active(parent_id)?;
        let def = TaskDefinition::new(
            format!("{parent_id}/{sub_id}"),
            name,
            vec![Phase::new(sub_id, name, weight)],
        );
        self.create(def, Some(parent_id.to_string()))
    }

    fn require_active(&self, id: &str) -> Result<(), ProgressError> {
        let table = self.lock();
        not_active_error(&table, id).map_or(Ok(()), Err)
    }

    pub(crate) fn get(&self, id: &str) -> Option<ProgressState> {
        let table = self.lock();
        table
            .active
            .get(id)
            .map(|e| e.state.clone())
            .or_else(|| table.history.iter().rev().find(|s| s.id == id).cloned())
    }

    pub(crate) fn update(&self, id: &str, update: &ProgressUpdate) -> Result<ProgressState, ProgressError> {
        let now = Utc::now();
        let mut events = Vec::new();
        let state = {
            let mut table = self.lock();
            if let Some(err) = not_active_error(&table, id) {
                return Err(err);
            }
            let entry = table
                .active
                .get_mut(id)
                .ok_or_else(|| ProgressError::TaskNotFound(id.to_string()))?;
            entry.start_if_pending(now);
            entry.apply(update);
            let state = entry.state.clone();
            events.push(ProgressEvent::Progress(state.clone()));
            propagate_to_parents(&mut table, &state, &mut events);
            state
        };
        self.emit(events);
        Ok(state)
    }

    pub(crate) fn set_phase(
        &self,
        id: &str,
        phase_id: &str,
        update: Option<&ProgressUpdate>,
    ) -> Result<ProgressState, ProgressError> {
        let now = Utc::now();
        let mut events = Vec::new();
        let state = {
            let mut table = self.lock();
            if let Some(err) = not_active_error(&table, id) {
                return Err(err);
            }
            let entry = table
                .active
                .get_mut(id)
                .ok_or_else(|| ProgressError::TaskNotFound(id.to_string()))?;

            let new_idx = entry
                .phase_ids
                .iter()
                .position(|p| p == phase_id)
                .ok_or_else(|| ProgressError::UnknownPhase {
                    task_id: id.to_string(),
                    phase_id: phase_id.to_string(),
                })?;
            let current_idx = entry.state.current_phase_index;
            if new_idx < current_idx {
                return Err(ProgressError::PhaseRegression {
                    task_id: id.to_string(),
                    phase_id: phase_id.to_string(),
                });
            }

            let missing: Vec<&str> = entry.dependencies[new_idx]
                .iter()
                .filter(|dep| {
                    match entry.phase_ids.iter().position(|p| p == *dep) {
                        Some(dep_idx) => !(dep_idx < new_idx && dep_idx <= current_idx),
                        None => true,
                    }
                })
                .map(|d| d.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(ProgressError::DependencyNotMet {
                    phase_id: phase_id.to_string(),
                    missing: missing.join(", "),
                });
            }

            let previous = entry.state.current_phase.replace(phase_id.to_string());
            entry.state.current_phase_index = new_idx;
            entry.state.phase_progress = 0.0;
            entry.start_if_pending(now);
            match update {
                Some(u) => entry.apply(u),
                None => entry.recompute(),
            }

            let state = entry.state.clone();
            events.push(ProgressEvent::PhaseChanged {
                previous,
                state: state.clone(),
            });
            propagate_to_parents(&mut table, &state, &mut events);
            state
        };
        tracing::debug!(task_id = %id, phase = %phase_id, "phase changed");
        self.emit(events);
        Ok(state)
    }

    /// Move a task and its live subtasks to a terminal state.
    /// Returns `false` when the task is unknown or already finished.
    pub(crate) fn finish(&self, id: &str, terminal: Terminal) -> bool {
        let now = Utc::now();
        let mut events = Vec::new();
        let done = {
            let mut table = self.lock();
            finish_locked(&mut table, id, &terminal, now, self.config.history_limit, &mut events)
        };
        if done {
            tracing::debug!(task_id = %id, terminal = ?terminal, "progress task finished");
        }
        self.emit(events);
        done
    }

    pub(crate) fn refresh_estimates(&self, now: DateTime<Utc>) {
        let mut table = self.lock();
        for entry in table.active.values_mut() {
            if entry.state.status != ProgressStatus::Running {
                continue;
            }
            if let Some(start) = entry.state.start_time {
                if let Some(eta) = estimator::estimate_end(start, now, entry.state.overall_progress) {
                    entry.state.estimated_end_time = Some(eta);
                }
            }
        }
    }
}

fn not_active_error(table: &TaskTable, id: &str) -> Option<ProgressError> {
    if table.active.contains_key(id) {
        None
    } else if table.history.iter().any(|s| s.id == id) {
        Some(ProgressError::TaskTerminal(id.to_string()))
    } else {
        Some(ProgressError::TaskNotFound(id.to_string()))
    }
}

/// Push `child`'s overall progress into each ancestor's subtask cache.
fn propagate_to_parents(table: &mut TaskTable, child: &ProgressState, events: &mut Vec<ProgressEvent>) {
    let mut child_id = child.id.clone();
    let mut child_progress = child.overall_progress;
    let mut parent_id = child.parent_id.clone();

    while let Some(pid) = parent_id {
        let Some(parent) = table.active.get_mut(&pid) else {
            break;
        };
        parent.subtask_progress.insert(child_id, child_progress);
        parent.recompute();
        events.push(ProgressEvent::Progress(parent.state.clone()));

        child_id = pid;
        child_progress = parent.state.overall_progress;
        parent_id = parent.state.parent_id.clone();
    }
}

fn finish_locked(
    table: &mut TaskTable,
    id: &str,
    terminal: &Terminal,
    now: DateTime<Utc>,
    history_limit: usize,
    events: &mut Vec<ProgressEvent>,
) -> bool {
    let children = match table.active.get(id) {
        Some(entry) => entry.subtasks.clone(),
        None => return false,
    };
    for child in &children {
        finish_locked(table, child, terminal, now, history_limit, events);
    }

    let Some(mut entry) = table.active.remove(id) else {
        return false;
    };
    if let Some(deadline) = entry.deadline.take() {
        deadline.abort();
    }

    let state = &mut entry.state;
    state.end_time = Some(now);
    state.estimated_end_time = None;
    state.overall_progress = 100.0;
    state.phase_progress = 100.0;
    let event = match terminal {
        Terminal::Complete(message) => {
            state.status = ProgressStatus::Completed;
            if let Some(m) = message {
                state.message = Some(m.clone());
            }
            ProgressEvent::Completed(state.clone())
        }
        Terminal::Fail(error) => {
            state.status = ProgressStatus::Failed;
            state.error = Some(error.clone());
            ProgressEvent::Failed(state.clone())
        }
        Terminal::Cancel(reason) => {
            state.status = ProgressStatus::Cancelled;
            state.message = Some(reason.clone());
            ProgressEvent::Cancelled(state.clone())
        }
    };
    events.push(event);
    propagate_to_parents(table, &entry.state, events);

    table.history.push_back(entry.state);
    while table.history.len() > history_limit {
        table.history.pop_front();
    }
    true
}
