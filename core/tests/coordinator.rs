mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{coordinator, exec_config, FakeRunner, FakeScript, MemoryFileSystem};
use runwarden_core::config::{ExecutionConfig, ResourceLimits};
use runwarden_core::executor::{CancelToken, ParameterDef, ParameterType};
use runwarden_core::progress::ProgressStatus;
use runwarden_core::runner::Signal;
use runwarden_core::security::IssueCategory;
use runwarden_core::util::TRUNCATION_MARKER;
use runwarden_core::{ExecutionError, ExecutionEvent, FailureKind, ScriptOptions};

const HELLO: &str = "/work/hello.sh";

fn setup(config: ExecutionConfig) -> (Arc<FakeRunner>, Arc<MemoryFileSystem>, runwarden_core::Coordinator) {
    let runner = FakeRunner::new();
    let fs = MemoryFileSystem::new();
    let coord = coordinator(config, &runner, &fs);
    (runner, fs, coord)
}

#[tokio::test]
async fn runs_script_and_captures_output() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");
    runner.script(HELLO, FakeScript::printing("hello\n"));

    let result = coord
        .execute_script(HELLO, ScriptOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.output, "hello\n");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.failure_kind, None);
    assert_eq!(result.error, None);
    assert_eq!(result.shell, "bash");
    assert_eq!(result.working_directory, std::path::PathBuf::from("/work"));
    assert!(!result.truncated);
    assert!(result.id.starts_with("exec-"));

    assert_eq!(coord.running_count(), 0);
    assert_eq!(coord.history().len(), 1);

    let args = runner.last_args().unwrap();
    assert_eq!(args.program, "bash");
    assert_eq!(args.args[0], HELLO);
    assert!(args.clear_env, "sandboxed runs start from a clean environment");

    let progress = coord.progress().get(&result.id).unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.overall_progress, 100.0);
}

#[tokio::test]
async fn non_zero_exit_reports_stderr() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");
    runner.script(
        HELLO,
        FakeScript {
            stderr: vec!["something broke\n".into()],
            exit_code: 2,
            ..FakeScript::default()
        },
    );

    let result = coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::NonZeroExit));
    assert_eq!(result.exit_code, Some(2));
    assert_eq!(result.error.as_deref(), Some("something broke"));
    assert_eq!(result.stderr, "something broke\n");

    let progress = coord.progress().get(&result.id).unwrap();
    assert_eq!(progress.status, ProgressStatus::Failed);
    assert_eq!(progress.overall_progress, 100.0);
}

#[tokio::test]
async fn non_zero_exit_without_stderr_names_the_code() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "exit 3\n");
    runner.script(
        HELLO,
        FakeScript {
            exit_code: 3,
            ..FakeScript::default()
        },
    );

    let result = coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();
    assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
}

#[tokio::test(start_paused = true)]
async fn capacity_rejection_touches_nothing() {
    let config = ExecutionConfig {
        max_concurrent_scripts: 1,
        allowed_extensions: vec![".sh".into()],
        restrict_to_base_path: true,
        base_path: Some("/scripts".into()),
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add("/scripts/long.sh", "sleep 60\n");
    fs.add("/scripts/other.sh", "echo hi\n");
    runner.script("/scripts/long.sh", FakeScript::running_for(Duration::from_secs(60)));

    let first = coord
        .spawn_script("/scripts/long.sh", ScriptOptions::default())
        .await
        .unwrap();
    let accesses = fs.accesses();

    let err = coord
        .spawn_script("/scripts/other.sh", ScriptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::CapacityExceeded { limit: 1 }));
    assert_eq!(fs.accesses(), accesses, "no file-system access after rejection");

    assert!(first.cancel());
    let result = first.wait().await.unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));
    assert_eq!(runner.spawn_count(), 1);

    // the slot is free again
    coord
        .execute_script("/scripts/other.sh", ScriptOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn traversal_outside_base_path_is_rejected_before_any_read() {
    let config = ExecutionConfig {
        restrict_to_base_path: true,
        base_path: Some("/scripts".into()),
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add("/etc/evil.sh", "echo pwned\n");

    for path in ["../../etc/evil.sh", "/scripts/../../etc/evil.sh", "../../etc/passwd"] {
        let err = coord
            .execute_script(path, ScriptOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)), "{path}: {err}");
    }
    assert_eq!(fs.accesses(), 0);
    assert_eq!(runner.spawn_count(), 0);
    assert_eq!(coord.running_count(), 0);
}

#[tokio::test]
async fn dangerous_content_is_blocked() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add("/work/wipe.sh", "mkfs.ext4 /dev/sda1\nrm -rf /\n");

    let err = coord
        .execute_script("/work/wipe.sh", ScriptOptions::default())
        .await
        .unwrap_err();
    match err {
        ExecutionError::SecurityViolation { issues } => {
            let cats: Vec<IssueCategory> = issues.iter().map(|i| i.category).collect();
            assert!(cats.contains(&IssueCategory::DiskFormat));
            assert!(cats.contains(&IssueCategory::DestructiveDelete));
        }
        other => panic!("expected SecurityViolation, got {other:?}"),
    }
    assert_eq!(runner.spawn_count(), 0);
    assert!(coord.history().is_empty());
}

#[tokio::test]
async fn validation_rejects_extension_missing_file_and_size() {
    let config = ExecutionConfig {
        resource_limits: ResourceLimits {
            max_file_size_bytes: Some(8),
            ..ResourceLimits::default()
        },
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add("/work/tool.exe", "MZ");
    fs.add("/work/big.sh", "echo this is too long\n");

    for path in ["/work/tool.exe", "/work/missing.sh", "/work/big.sh"] {
        let err = coord
            .execute_script(path, ScriptOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)), "{path}: {err}");
    }
    assert_eq!(runner.spawn_count(), 0);
}

#[tokio::test]
async fn unknown_shell_is_rejected() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");

    let err = coord
        .execute_script(HELLO, ScriptOptions::default().with_shell("fish"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::UnsupportedShell(ref s) if s == "fish"));
    assert_eq!(runner.spawn_count(), 0);
}

#[tokio::test]
async fn parameters_are_validated_and_passed() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo \"$2\"\n");
    let schema = vec![
        ParameterDef {
            pattern: Some("^[a-z]+$".into()),
            ..ParameterDef::new("name", ParameterType::String).required()
        },
        ParameterDef {
            min: Some(1.0),
            ..ParameterDef::new("count", ParameterType::Integer)
        },
    ];

    let bad = ScriptOptions {
        parameter_schema: Some(schema.clone()),
        ..ScriptOptions::default().with_param("count", 0)
    };
    let err = coord.execute_script(HELLO, bad).await.unwrap_err();
    assert!(matches!(err, ExecutionError::InvalidParameter { ref name, .. } if name == "name"));

    let good = ScriptOptions {
        parameter_schema: Some(schema),
        ..ScriptOptions::default()
            .with_param("name", "world")
            .with_param("count", 2)
    };
    let result = coord.execute_script(HELLO, good).await.unwrap();
    assert!(result.success);
    assert_eq!(result.parameters.get("name"), Some(&json!("world")));
    assert_eq!(
        runner.last_args().unwrap().args,
        vec![HELLO, "--count", "2", "--name", "world"]
    );
}

#[tokio::test]
async fn output_is_truncated_at_the_limit() {
    let config = ExecutionConfig {
        max_output_length: 10,
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add(HELLO, "echo lots\n");
    runner.script(
        HELLO,
        FakeScript {
            stdout: vec!["0123456".into(), "789ABCDEF".into()],
            ..FakeScript::default()
        },
    );

    let result = coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();
    assert!(result.truncated);
    assert_eq!(result.output, format!("0123456789{TRUNCATION_MARKER}"));
    assert_eq!(result.output_length, 16);
}

#[tokio::test(start_paused = true)]
async fn timeout_kills_the_process() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "sleep 600\n");
    runner.script(HELLO, FakeScript::running_for(Duration::from_secs(600)));

    let result = coord
        .execute_script(HELLO, ScriptOptions::default().with_timeout(Duration::from_secs(2)))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::Timeout));
    assert_eq!(
        result.error.as_deref(),
        Some("Script execution timed out after 2000ms")
    );
    assert_eq!(runner.signals(), vec![Signal::Kill]);

    let progress = coord.progress().get(&result.id).unwrap();
    assert_eq!(progress.status, ProgressStatus::Failed);
    assert_eq!(
        progress.error.as_deref(),
        Some("Script execution timed out after 2000ms"),
        "the runner timeout, not the tracker deadline, fails the tracker"
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_execution_frees_its_slot_before_the_process_exits() {
    let config = ExecutionConfig {
        max_concurrent_scripts: 1,
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add(HELLO, "trap '' TERM; sleep 600\n");
    fs.add("/work/next.sh", "echo next\n");
    runner.script(
        HELLO,
        FakeScript {
            run_for: Duration::from_secs(600),
            ignore_term: true,
            ..FakeScript::default()
        },
    );
    runner.script("/work/next.sh", FakeScript::printing("next\n"));

    let first = coord.spawn_script(HELLO, ScriptOptions::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(first.cancel());
    assert_eq!(coord.running_count(), 0);

    // the first process is still inside its grace window here
    let second = coord
        .spawn_script("/work/next.sh", ScriptOptions::default())
        .await
        .expect("cancel gives the slot back");
    assert_eq!(coord.running_count(), 1);

    let err = coord
        .spawn_script("/work/next.sh", ScriptOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::CapacityExceeded { limit: 1 }));

    let second = second.await.unwrap();
    assert!(second.success);
    assert_eq!(second.output, "next\n");

    let first = first.await.unwrap();
    assert_eq!(first.failure_kind, Some(FailureKind::Cancelled));
    assert_eq!(coord.running_count(), 0);
    assert_eq!(runner.spawn_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_escalates_after_grace_window() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "trap '' TERM; sleep 600\n");
    runner.script(
        HELLO,
        FakeScript {
            run_for: Duration::from_secs(600),
            ignore_term: true,
            ..FakeScript::default()
        },
    );

    let handle = coord.spawn_script(HELLO, ScriptOptions::default()).await.unwrap();
    let id = handle.id().to_string();
    let mut events = handle.subscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(coord.running()[0].pid, Some(31337));

    assert!(coord.cancel_script(&id));
    assert_eq!(coord.running_count(), 0, "entry removed immediately");
    assert!(!coord.cancel_script(&id));
    assert_eq!(
        coord.progress().get(&id).unwrap().status,
        ProgressStatus::Cancelled
    );

    let result = handle.await.unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));
    assert_eq!(
        result.error.as_deref(),
        Some("Script execution was cancelled: Cancelled by user")
    );
    assert_eq!(runner.signals(), vec![Signal::Term, Signal::Kill]);
    assert_eq!(
        coord.progress().get(&id).unwrap().status,
        ProgressStatus::Cancelled
    );

    let mut cancelled = None;
    while let Ok(ev) = events.try_recv() {
        if let ExecutionEvent::Cancelled { reason, result, .. } = ev {
            cancelled = Some((reason, result));
        }
    }
    let (reason, event_result) = cancelled.expect("cancelled event");
    assert_eq!(reason, "Cancelled by user");
    assert_eq!(event_result, result);
}

#[tokio::test(start_paused = true)]
async fn external_token_cancels() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "sleep 600\n");
    runner.script(HELLO, FakeScript::running_for(Duration::from_secs(600)));

    let token = CancelToken::new();
    let options = ScriptOptions {
        cancel_token: Some(token.clone()),
        ..ScriptOptions::default()
    };
    let handle = coord.spawn_script(HELLO, options).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel("deploy aborted");

    let result = handle.wait().await.unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));
    assert!(result.error.unwrap().contains("deploy aborted"));
    assert_eq!(runner.signals(), vec![Signal::Term]);
}

#[tokio::test]
async fn spawn_failure_becomes_a_result() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");
    runner.fail_spawns();

    let result = coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::SpawnFailed));
    assert!(result.error.unwrap().starts_with("Failed to spawn process"));
    assert_eq!(coord.running_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn history_keeps_the_latest_hundred() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");
    runner.script(HELLO, FakeScript::printing("hi\n"));

    let mut ids = Vec::new();
    for _ in 0..101 {
        let r = coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();
        ids.push(r.id);
    }

    let history = coord.history();
    assert_eq!(history.len(), 100);
    assert_eq!(history[0].id, ids[1]);
    assert_eq!(history[99].id, ids[100]);
    assert!(!history.iter().any(|r| r.id == ids[0]));
}

#[tokio::test]
async fn events_and_callbacks_follow_the_output() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");
    runner.script(HELLO, FakeScript::printing("hello\n"));

    let mut events = coord.subscribe();
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = seen.clone();
    let options = ScriptOptions {
        on_output: Some(Arc::new(move |chunk: &str| sink.lock().unwrap().push_str(chunk))),
        ..ScriptOptions::default()
    };

    let result = coord.execute_script(HELLO, options).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), "hello\n");

    let mut kinds = Vec::new();
    while let Ok(ev) = events.try_recv() {
        assert_eq!(ev.execution_id(), result.id);
        kinds.push(match ev {
            ExecutionEvent::Started { .. } => "started",
            ExecutionEvent::Output { .. } => "output",
            ExecutionEvent::Completed(_) => "completed",
            ExecutionEvent::Failed(_) => "failed",
            ExecutionEvent::Cancelled { .. } => "cancelled",
        });
    }
    assert_eq!(kinds, vec!["started", "output", "completed"]);
}

#[tokio::test]
async fn output_drives_execution_progress_up_to_the_cap() {
    let config = ExecutionConfig {
        max_output_length: 20,
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add(HELLO, "yes | head -n 50\n");
    runner.script(
        HELLO,
        FakeScript {
            stdout: vec!["y\n".repeat(5); 10],
            ..FakeScript::default()
        },
    );

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let options = ScriptOptions {
        on_progress: Some(Arc::new(move |state: &runwarden_core::ProgressState| {
            sink.lock().unwrap().push(state.clone())
        })),
        ..ScriptOptions::default()
    };

    let result = coord.execute_script(HELLO, options).await.unwrap();
    assert!(result.success);
    assert!(result.truncated);

    let states = states.lock().unwrap();
    let (last, running) = states.split_last().expect("progress reported");
    assert!(!running.is_empty(), "output produced progress updates");
    // preparation (10) plus 80% of the 90% cap
    for state in running {
        assert_eq!(state.status, ProgressStatus::Running);
        assert!(state.overall_progress > 10.0);
        assert!(state.overall_progress <= 82.0 + 1e-9, "{}", state.overall_progress);
    }
    let peak = running.last().unwrap().overall_progress;
    assert!((peak - 82.0).abs() < 1e-9, "{peak}");
    assert!(running
        .windows(2)
        .all(|w| w[0].overall_progress <= w[1].overall_progress));

    assert_eq!(last.status, ProgressStatus::Completed);
    assert_eq!(last.overall_progress, 100.0);
}

#[tokio::test]
async fn stdin_payload_reaches_the_process() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "cat\n");
    let options = ScriptOptions {
        stdin: Some("payload\n".into()),
        ..ScriptOptions::default()
    };
    coord.execute_script(HELLO, options).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runner.stdin_seen(), "payload\n");
}

#[tokio::test]
async fn results_are_persisted_when_enabled() {
    let config = ExecutionConfig {
        auto_save_results: true,
        output_directory: "/results".into(),
        ..exec_config()
    };
    let (runner, fs, coord) = setup(config);
    fs.add(HELLO, "echo hello\n");
    runner.script(HELLO, FakeScript::printing("hello\n"));

    let result = coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();

    let files = fs.files_under(std::path::Path::new("/results"));
    assert_eq!(files.len(), 1);
    let (path, body) = &files[0];
    let name = path.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with(&format!("{}_", result.id)));
    assert!(name.ends_with(".json"));
    let saved: runwarden_core::ExecutionResult = serde_json::from_str(body).unwrap();
    assert_eq!(saved, result);
}

#[tokio::test]
async fn standalone_screening_does_not_execute() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add("/work/net.sh", "curl https://example.com -o out.txt\n");

    let report = coord.validate_script_security("/work/net.sh").await.unwrap();
    assert!(!report.safe);
    assert!(report.has_category(IssueCategory::NetworkAccess));
    assert!(!report.recommendations.is_empty());
    assert_eq!(runner.spawn_count(), 0);

    assert!(coord.screen_content("echo fine\n").safe);
}

#[tokio::test(start_paused = true)]
async fn cleanup_cancels_running_and_clears_history() {
    let (runner, fs, coord) = setup(exec_config());
    fs.add(HELLO, "echo hello\n");
    fs.add("/work/long.sh", "sleep 600\n");
    runner.script("/work/long.sh", FakeScript::running_for(Duration::from_secs(600)));

    coord.execute_script(HELLO, ScriptOptions::default()).await.unwrap();
    let handle = coord
        .spawn_script("/work/long.sh", ScriptOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    coord.cleanup();
    assert_eq!(coord.running_count(), 0);
    assert!(coord.history().is_empty());
    assert!(!coord.progress().estimator_running());

    let result = handle.await.unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));
}
