//! Runner runtime: pumps stdout/stderr into the sink, enforces the timeout,
//! reacts to cancellation and drains what is left once the child exits.
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::RunnerError;

use super::abort;
use super::io_pump;
use super::traits::RunnerSession;
use super::types::{OutputChunk, OutputSink, RunOutcome, RunStatus};

/// Upper bound on how long buffered output is drained after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RunProcessInput {
    pub session: Box<dyn RunnerSession>,
    pub timeout: Option<Duration>,
    /// `Some(reason)` requests cancellation.
    pub cancel_rx: watch::Receiver<Option<String>>,
    pub termination_grace: Duration,
    pub stdin_payload: Option<String>,
    pub chunk_channel_capacity: usize,
}

enum StopReason {
    Timeout,
    Cancel(String),
}

pub async fn run_process(input: RunProcessInput, sink: &mut dyn OutputSink) -> RunOutcome {
    let RunProcessInput {
        mut session,
        timeout,
        mut cancel_rx,
        termination_grace,
        stdin_payload,
        chunk_channel_capacity,
    } = input;

    let started_at = Instant::now();
    let pid = session.pid();
    tracing::debug!(pid = ?pid, timeout_ms = ?timeout.map(|t| t.as_millis() as u64), "runner started");

    if let Some(mut stdin) = session.stdin() {
        match stdin_payload.filter(|p| !p.is_empty()) {
            Some(payload) => {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                        tracing::debug!(error.kind = "runner.stdin_write", error.message = %e);
                    }
                    let _ = stdin.shutdown().await;
                });
            }
            None => drop(stdin),
        }
    }

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<OutputChunk>(chunk_channel_capacity.max(1));
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = session.stdout() {
        pumps.push(io_pump::pump_stdout(stdout, chunk_tx.clone()));
    }
    if let Some(stderr) = session.stderr() {
        pumps.push(io_pump::pump_stderr(stderr, chunk_tx.clone()));
    }
    drop(chunk_tx);

    let (exit_status, stop_reason) = {
        let wait_fut = session.wait();
        tokio::pin!(wait_fut);

        let sleep = tokio::time::sleep(timeout.unwrap_or(Duration::ZERO));
        tokio::pin!(sleep);

        let mut status = None;
        let mut reason = cancel_rx.borrow_and_update().clone().map(StopReason::Cancel);
        let mut cancel_open = true;
        let mut chunks_open = true;

        while reason.is_none() {
            tokio::select! {
                res = &mut wait_fut => {
                    status = Some(res);
                    break;
                }

                _ = &mut sleep, if timeout.is_some() => {
                    tracing::warn!(error.kind = "runner.timeout", pid = ?pid);
                    reason = Some(StopReason::Timeout);
                }

                changed = cancel_rx.changed(), if cancel_open => {
                    match changed {
                        Ok(()) => {
                            if let Some(msg) = cancel_rx.borrow_and_update().clone() {
                                tracing::warn!(error.kind = "runner.cancelled", reason = %msg);
                                reason = Some(StopReason::Cancel(msg));
                            }
                        }
                        Err(_) => cancel_open = false,
                    }
                }

                chunk = chunk_rx.recv(), if chunks_open => {
                    match chunk {
                        Some(chunk) => sink.on_chunk(chunk),
                        None => chunks_open = false,
                    }
                }
            }
        }
        (status, reason)
    };

    let mut outcome = RunOutcome {
        status: RunStatus::Completed,
        exit_code: None,
        duration_ms: 0,
        cancel_reason: None,
        error: None,
    };

    match stop_reason {
        Some(StopReason::Timeout) => {
            outcome.status = RunStatus::TimedOut;
            outcome.exit_code = abort::force_kill(&mut session).await;
        }
        Some(StopReason::Cancel(msg)) => {
            outcome.status = RunStatus::Cancelled;
            outcome.exit_code = abort::terminate_sequence(&mut session, termination_grace).await;
            outcome.cancel_reason = Some(msg);
        }
        None => match exit_status {
            Some(Ok(code)) => outcome.exit_code = Some(code),
            Some(Err(e)) => {
                let err = RunnerError::Plugin(e);
                tracing::error!(error.kind = "runner.wait_failed", error.message = %err);
                outcome.error = Some(format!("Failed to wait for process: {err}"));
            }
            None => {}
        },
    }

    drain(&mut chunk_rx, sink).await;
    for pump in pumps {
        if pump.is_finished() {
            if let Ok(Err(e)) = pump.await {
                tracing::debug!(error.kind = "runner.stream_io", error.message = %e);
            }
        } else {
            pump.abort();
        }
    }

    outcome.duration_ms = started_at.elapsed().as_millis() as u64;
    tracing::debug!(
        pid = ?pid,
        status = ?outcome.status,
        exit_code = ?outcome.exit_code,
        duration_ms = outcome.duration_ms,
        "runner finished"
    );
    outcome
}

/// Deliver buffered chunks until both pumps hit EOF or the drain window closes.
/// A detached grandchild can hold the pipes open forever.
async fn drain(chunk_rx: &mut mpsc::Receiver<OutputChunk>, sink: &mut dyn OutputSink) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, chunk_rx.recv()).await {
            Ok(Some(chunk)) => sink.on_chunk(chunk),
            Ok(None) => break,
            Err(_) => {
                tracing::debug!("output drain window elapsed");
                break;
            }
        }
    }
}
