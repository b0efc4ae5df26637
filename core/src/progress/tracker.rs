use std::sync::Arc;

use crate::error::ProgressError;

use super::registry::{RegistryInner, Terminal};
use super::types::{ProgressState, ProgressUpdate};

/// Handle to one task in a [`super::ProgressRegistry`]. Clones refer to the
/// same task; the state itself lives in the registry.
#[derive(Clone)]
pub struct Tracker {
    id: String,
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker").field("id", &self.id).finish()
    }
}

impl Tracker {
    pub(crate) fn new(id: String, inner: Arc<RegistryInner>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state, from history once the task has finished.
    pub fn state(&self) -> Option<ProgressState> {
        self.inner.get(&self.id)
    }

    pub fn update_progress(&self, update: ProgressUpdate) -> Result<ProgressState, ProgressError> {
        self.inner.update(&self.id, &update)
    }

    pub fn set_phase(
        &self,
        phase_id: &str,
        update: Option<ProgressUpdate>,
    ) -> Result<ProgressState, ProgressError> {
        self.inner.set_phase(&self.id, phase_id, update.as_ref())
    }

    pub fn complete(&self, message: Option<&str>) -> bool {
        self.inner
            .finish(&self.id, Terminal::Complete(message.map(str::to_string)))
    }

    pub fn fail(&self, error: &str) -> bool {
        self.inner.finish(&self.id, Terminal::Fail(error.to_string()))
    }

    pub fn cancel(&self, reason: &str) -> bool {
        self.inner.finish(&self.id, Terminal::Cancel(reason.to_string()))
    }

    /// Nested tracker with id `{parent}/{sub_id}` and a single phase.
    pub fn add_sub_task(&self, sub_id: &str, name: &str, weight: f64) -> Result<Tracker, ProgressError> {
        let state = self.inner.add_sub_task(&self.id, sub_id, name, weight)?;
        Ok(Tracker::new(state.id, self.inner.clone()))
    }
}
