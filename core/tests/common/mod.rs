#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;

use runwarden_core::config::{ExecutionConfig, ProgressConfig};
use runwarden_core::fs::FileSystem;
use runwarden_core::runner::{RunnerPlugin, RunnerSession, RunnerStartArgs, Signal};
use runwarden_core::Coordinator;

/// In-memory file system that counts every access.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    accesses: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, path: impl Into<PathBuf>, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), content.as_bytes().to_vec());
    }

    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn files_under(&self, dir: &Path) -> Vec<(PathBuf, String)> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p.starts_with(dir))
            .map(|(p, c)| (p.clone(), String::from_utf8_lossy(c).into_owned()))
            .collect()
    }

    fn touch(&self) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
    }

    fn not_found(path: &Path) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        self.touch();
        self.reads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        let bytes = files.get(path).ok_or_else(|| Self::not_found(path))?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        self.touch();
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    async fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
        self.touch();
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.touch();
        self.files.lock().unwrap().contains_key(path)
    }

    async fn file_size(&self, path: &Path) -> std::io::Result<u64> {
        self.touch();
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }
}

/// Scripted behaviour of one fake process.
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
    pub run_for: Duration,
    pub ignore_term: bool,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: 0,
            run_for: Duration::from_millis(5),
            ignore_term: false,
        }
    }
}

impl FakeScript {
    pub fn printing(text: &str) -> Self {
        Self {
            stdout: vec![text.to_string()],
            ..Self::default()
        }
    }

    pub fn running_for(run_for: Duration) -> Self {
        Self {
            run_for,
            ..Self::default()
        }
    }
}

/// Runner plugin that fakes processes, keyed by script path (the first
/// argument every builder passes).
#[derive(Default)]
pub struct FakeRunner {
    scripts: Mutex<HashMap<PathBuf, FakeScript>>,
    fail_spawn: Mutex<bool>,
    spawned: Mutex<Vec<RunnerStartArgs>>,
    signals: Arc<Mutex<Vec<Signal>>>,
    stdin_seen: Arc<Mutex<String>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: impl Into<PathBuf>, behaviour: FakeScript) {
        self.scripts.lock().unwrap().insert(path.into(), behaviour);
    }

    pub fn fail_spawns(&self) {
        *self.fail_spawn.lock().unwrap() = true;
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn last_args(&self) -> Option<RunnerStartArgs> {
        self.spawned.lock().unwrap().last().cloned()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn stdin_seen(&self) -> String {
        self.stdin_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunnerPlugin for FakeRunner {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start_session(&self, args: &RunnerStartArgs) -> anyhow::Result<Box<dyn RunnerSession>> {
        if *self.fail_spawn.lock().unwrap() {
            anyhow::bail!("No such file or directory (os error 2)");
        }
        self.spawned.lock().unwrap().push(args.clone());

        let script = args
            .args
            .iter()
            .find_map(|a| self.scripts.lock().unwrap().get(Path::new(a)).cloned())
            .unwrap_or_default();

        let (mut out_wr, out_rd) = tokio::io::duplex(64 * 1024);
        let (mut err_wr, err_rd) = tokio::io::duplex(64 * 1024);
        let (in_wr, mut in_rd) = tokio::io::duplex(64 * 1024);

        let stdout = script.stdout.clone();
        let stderr = script.stderr.clone();
        tokio::spawn(async move {
            for chunk in stdout {
                let _ = out_wr.write_all(chunk.as_bytes()).await;
            }
            for chunk in stderr {
                let _ = err_wr.write_all(chunk.as_bytes()).await;
            }
        });

        let stdin_seen = self.stdin_seen.clone();
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = in_rd.read_to_string(&mut buf).await;
            stdin_seen.lock().unwrap().push_str(&buf);
        });

        Ok(Box::new(FakeSession {
            stdin: Some(in_wr),
            stdout: Some(out_rd),
            stderr: Some(err_rd),
            script,
            stopped: Arc::new(Notify::new()),
            signals: self.signals.clone(),
        }))
    }
}

struct FakeSession {
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    script: FakeScript,
    stopped: Arc<Notify>,
    signals: Arc<Mutex<Vec<Signal>>>,
}

#[async_trait]
impl RunnerSession for FakeSession {
    fn pid(&self) -> Option<u32> {
        Some(31337)
    }

    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>> {
        self.stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncWrite + Unpin + Send>)
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn signal(&mut self, signal: Signal) -> anyhow::Result<()> {
        self.signals.lock().unwrap().push(signal);
        if signal == Signal::Kill || !self.script.ignore_term {
            self.stopped.notify_one();
        }
        Ok(())
    }

    async fn wait(&mut self) -> anyhow::Result<i32> {
        tokio::select! {
            _ = tokio::time::sleep(self.script.run_for) => Ok(self.script.exit_code),
            _ = self.stopped.notified() => Ok(137),
        }
    }
}

pub fn exec_config() -> ExecutionConfig {
    ExecutionConfig {
        default_shell: "bash".to_string(),
        ..ExecutionConfig::default()
    }
}

pub fn coordinator(
    config: ExecutionConfig,
    runner: &Arc<FakeRunner>,
    fs: &Arc<MemoryFileSystem>,
) -> Coordinator {
    Coordinator::new(
        config,
        ProgressConfig::default(),
        runner.clone(),
        fs.clone(),
    )
}
