use std::time::Duration;

use super::traits::RunnerSession;
use super::types::Signal;

/// How long to wait for the OS to reap a process after a forced kill.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask the process to terminate, wait `grace`, then kill it.
pub async fn terminate_sequence(session: &mut Box<dyn RunnerSession>, grace: Duration) -> Option<i32> {
    if let Err(e) = session.signal(Signal::Term).await {
        tracing::warn!(error.kind = "runner.signal_failed", signal = "term", error.message = %e);
    }

    match tokio::time::timeout(grace, session.wait()).await {
        Ok(Ok(code)) => Some(code),
        Ok(Err(e)) => {
            tracing::warn!(error.kind = "runner.wait_failed", error.message = %e);
            None
        }
        Err(_) => {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "process ignored termination request, killing"
            );
            force_kill(session).await
        }
    }
}

pub async fn force_kill(session: &mut Box<dyn RunnerSession>) -> Option<i32> {
    if let Err(e) = session.signal(Signal::Kill).await {
        tracing::warn!(error.kind = "runner.signal_failed", signal = "kill", error.message = %e);
    }
    match tokio::time::timeout(KILL_REAP_TIMEOUT, session.wait()).await {
        Ok(Ok(code)) => Some(code),
        Ok(Err(e)) => {
            tracing::warn!(error.kind = "runner.wait_failed", error.message = %e);
            None
        }
        Err(_) => {
            tracing::error!(error.kind = "runner.kill_timeout", "process did not exit after kill");
            None
        }
    }
}
