//! CLI assembly: turns parsed arguments into coordinator calls and exit codes.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use runwarden_core::config::AppConfig;
use runwarden_core::executor::CancelToken;
use runwarden_core::progress::ProgressState;
use runwarden_core::security::SecurityResult;
use runwarden_core::{ExecutionResult, FailureKind, ScriptOptions};
use runwarden_plugins::factory::build_coordinator;

use crate::commands::cli::{CheckArgs, RunArgs};
use crate::error::CliError;
use crate::progress::ScriptProgress;

const EXIT_TIMEOUT: i32 = 124;
const EXIT_SPAWN_FAILED: i32 = 127;
const EXIT_CANCELLED: i32 = 130;

#[tracing::instrument(name = "cli.run", skip(cfg, run), fields(script = %run.script.display()))]
pub async fn run_script(cfg: &AppConfig, run: RunArgs) -> Result<i32, CliError> {
    let coord = build_coordinator(cfg);
    let label = run
        .script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let progress = ScriptProgress::new(&label, !run.no_progress && atty::is(atty::Stream::Stderr));

    let mut options = build_options(&run).await?;
    let token = CancelToken::new();
    options.cancel_token = Some(token.clone());
    {
        let p = progress.clone();
        options.on_output = Some(Arc::new(move |text: &str| p.stdout(text)));
        let p = progress.clone();
        options.on_error = Some(Arc::new(move |text: &str| p.stderr(text)));
        let p = progress.clone();
        options.on_progress = Some(Arc::new(move |state: &ProgressState| p.observe(state)));
    }

    let handle = coord.spawn_script(&run.script, options).await?;
    tracing::debug!(execution_id = %handle.id(), "script started");

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel("Interrupted by user");
        }
    });
    let result = handle.await;
    interrupt.abort();
    let result = result?;

    progress.finish(&result);
    if let Some(err) = result.error.as_deref().filter(|_| !result.success) {
        tracing::warn!(
            execution_id = %result.id,
            failure = ?result.failure_kind,
            error.message = %err,
            "script failed"
        );
    }
    coord.cleanup();
    Ok(exit_code_for_result(&result))
}

pub async fn check_script(cfg: &AppConfig, check: CheckArgs) -> Result<i32, CliError> {
    let coord = build_coordinator(cfg);
    let report = coord.validate_script_security(&check.script).await?;
    coord.cleanup();

    if check.json {
        let json = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
        println!("{json}");
    } else {
        print!("{}", render_report(&report));
    }
    Ok(if report.safe { 0 } else { 3 })
}

pub fn render_report(report: &SecurityResult) -> String {
    if report.safe {
        return "safe: no issues found\n".to_string();
    }
    let mut out = format!("unsafe: {} issue(s)\n", report.issues.len());
    for issue in &report.issues {
        if issue.category.is_capability() {
            out.push_str(&format!("  {issue} (not allowed by securityOptions)\n"));
        } else {
            out.push_str(&format!("  {issue}\n"));
        }
    }
    if !report.recommendations.is_empty() {
        out.push_str("recommendations:\n");
        for rec in &report.recommendations {
            out.push_str(&format!("  - {rec}\n"));
        }
    }
    out
}

pub async fn build_options(run: &RunArgs) -> Result<ScriptOptions, CliError> {
    let mut options = ScriptOptions {
        shell: run.shell.clone(),
        working_directory: run.cwd.clone(),
        timeout: run.timeout.map(Duration::from_secs),
        ..Default::default()
    };

    for raw in &run.params {
        let (k, v) = parse_key_value(raw, "--param")?;
        options.parameters.insert(k, parse_param_value(&v));
    }
    for raw in &run.env {
        let (k, v) = parse_key_value(raw, "--env")?;
        options.env.insert(k, v);
    }
    if let Some(path) = &run.stdin_file {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            CliError::Usage(format!("cannot read --stdin-file {}: {e}", path.display()))
        })?;
        options.stdin = Some(text);
    }
    Ok(options)
}

pub fn parse_key_value(raw: &str, flag: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(CliError::Usage(format!("{flag} expects KEY=VALUE, got '{raw}'"))),
    }
}

/// JSON scalars and containers keep their type; anything else is a string.
pub fn parse_param_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn exit_code_for_result(result: &ExecutionResult) -> i32 {
    if result.success {
        return 0;
    }
    match result.failure_kind {
        Some(FailureKind::Timeout) => EXIT_TIMEOUT,
        Some(FailureKind::Cancelled) => EXIT_CANCELLED,
        Some(FailureKind::SpawnFailed) => EXIT_SPAWN_FAILED,
        Some(FailureKind::NonZeroExit) | None => match result.exit_code {
            Some(code) if code != 0 => code,
            _ => 1,
        },
    }
}
