#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use runwarden_core::config::AppConfig;
use runwarden_core::{ExecutionResult, FailureKind, ScriptOptions};
use runwarden_plugins::factory::build_coordinator;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn app_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.execution.default_shell = "bash".into();
    cfg
}

#[tokio::test]
async fn captures_stdout_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "hello.sh", "echo \"hello $1\"\n");
    let coord = build_coordinator(&app_config());

    let result = coord
        .execute_script(&script, ScriptOptions::default().with_param("name", "x"))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.exit_code, Some(0));
    assert!(result.output.starts_with("hello --name"), "{}", result.output);
    assert_eq!(result.working_directory, dir.path());
    assert_eq!(coord.running_count(), 0);
}

#[tokio::test]
async fn non_zero_exit_reports_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.sh", "echo broken >&2\nexit 3\n");
    let coord = build_coordinator(&app_config());

    let result = coord
        .execute_script(&script, ScriptOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.failure_kind, Some(FailureKind::NonZeroExit));
    assert_eq!(result.error.as_deref(), Some("broken"));
}

#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "slow.sh", "echo begin\nsleep 30\necho end\n");
    let coord = build_coordinator(&app_config());

    let started = Instant::now();
    let result = coord
        .execute_script(
            &script,
            ScriptOptions::default().with_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.failure_kind, Some(FailureKind::Timeout));
    assert_eq!(
        result.error.as_deref(),
        Some("Script execution timed out after 300ms")
    );
    assert!(result.output.contains("begin"));
    assert!(!result.output.contains("end"));
}

#[tokio::test]
async fn cancellation_terminates_a_running_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "wait.sh", "sleep 30\n");
    let coord = build_coordinator(&app_config());

    let handle = coord
        .spawn_script(&script, ScriptOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.cancel());

    let started = Instant::now();
    let result = handle.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));
    assert_eq!(
        result.error.as_deref(),
        Some("Script execution was cancelled: Cancelled by user")
    );
}

#[tokio::test]
async fn stdin_and_env_reach_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "read.sh",
        "read line\necho \"$GREETING $line\"\n",
    );
    let coord = build_coordinator(&app_config());

    let mut options = ScriptOptions::default();
    options.stdin = Some("world\n".into());
    options.env.insert("GREETING".into(), "hello".into());
    let result = coord.execute_script(&script, options).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "hello world\n");
}

#[tokio::test]
async fn results_are_saved_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("results");
    let script = write_script(dir.path(), "ok.sh", "echo saved\n");

    let mut cfg = app_config();
    cfg.execution.auto_save_results = true;
    cfg.execution.output_directory = out.display().to_string();
    let coord = build_coordinator(&cfg);

    let result = coord
        .execute_script(&script, ScriptOptions::default())
        .await
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let saved: ExecutionResult =
        serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
    assert_eq!(saved.id, result.id);
    assert_eq!(saved.output, "saved\n");
}
