use std::future::{Future, IntoFuture};
use std::pin::Pin;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ExecutionError;

use super::coordinator::Coordinator;
use super::events::ExecutionEvent;
use super::types::ExecutionResult;

/// A spawned execution. Await it (or call [`ExecutionHandle::wait`]) for the
/// final result.
pub struct ExecutionHandle {
    id: String,
    coordinator: Coordinator,
    events: broadcast::Sender<ExecutionEvent>,
    task: JoinHandle<ExecutionResult>,
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl ExecutionHandle {
    pub(crate) fn new(
        id: String,
        coordinator: Coordinator,
        events: broadcast::Sender<ExecutionEvent>,
        task: JoinHandle<ExecutionResult>,
    ) -> Self {
        Self {
            id,
            coordinator,
            events,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Events of this execution only, from the moment of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Same as `Coordinator::cancel_script` for this execution.
    pub fn cancel(&self) -> bool {
        self.coordinator.cancel_script(&self.id)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<ExecutionResult, ExecutionError> {
        self.task.await.map_err(|e| {
            ExecutionError::Io(std::io::Error::other(format!(
                "execution task ended abnormally: {e}"
            )))
        })
    }
}

impl IntoFuture for ExecutionHandle {
    type Output = Result<ExecutionResult, ExecutionError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
