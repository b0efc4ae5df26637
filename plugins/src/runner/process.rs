use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use runwarden_core::config::ResourceLimits;
use runwarden_core::runner::exit::normalize_exit;
use runwarden_core::runner::{RunnerPlugin, RunnerSession, RunnerStartArgs, Signal};

/// Spawns scripts as local child processes with piped stdio.
///
/// On unix every child leads its own process group so termination reaches
/// whatever the script started, and resource limits are applied between
/// fork and exec.
pub struct ProcessRunnerPlugin {}

impl ProcessRunnerPlugin {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ProcessRunnerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunnerPlugin for ProcessRunnerPlugin {
    fn name(&self) -> &str {
        "process"
    }

    async fn start_session(&self, args: &RunnerStartArgs) -> Result<Box<dyn RunnerSession>> {
        let mut cmd = Command::new(&args.program);
        cmd.args(&args.args);
        if let Some(cwd) = &args.cwd {
            cmd.current_dir(cwd);
        }
        if args.clear_env {
            cmd.env_clear();
        }
        cmd.envs(&args.envs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
            apply_limits(&mut cmd, &args.limits);
        }
        #[cfg(not(unix))]
        {
            if args.limits != ResourceLimits::default() {
                tracing::debug!("resource limits are not enforced on this platform");
            }
        }

        let child = cmd.spawn()?;
        tracing::debug!(
            program = %args.program,
            pid = child.id().unwrap_or_default(),
            "process spawned"
        );
        Ok(Box::new(ProcessSession { child }))
    }
}

#[cfg(unix)]
fn apply_limits(cmd: &mut Command, limits: &ResourceLimits) {
    use nix::sys::resource::{setrlimit, Resource};

    if *limits == ResourceLimits::default() {
        return;
    }
    let memory = limits.max_memory_mb.map(|mb| mb.saturating_mul(1024 * 1024));
    let cpu = limits.max_cpu_time_sec;
    let fsize = limits.max_file_size_bytes;

    // SAFETY: the closure runs in the forked child before exec and only
    // calls setrlimit, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(secs) = cpu {
                let v = secs as nix::libc::rlim_t;
                setrlimit(Resource::RLIMIT_CPU, v, v)?;
            }
            if let Some(bytes) = fsize {
                let v = bytes as nix::libc::rlim_t;
                setrlimit(Resource::RLIMIT_FSIZE, v, v)?;
            }
            #[cfg(any(target_os = "linux", target_os = "android"))]
            {
                if let Some(bytes) = memory {
                    let v = bytes as nix::libc::rlim_t;
                    setrlimit(Resource::RLIMIT_AS, v, v)?;
                }
            }
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            let _ = memory;
            Ok(())
        });
    }
}

struct ProcessSession {
    child: Child,
}

impl ProcessSession {
    #[cfg(unix)]
    fn signal_group(&mut self, sig: nix::sys::signal::Signal) -> Result<()> {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // already reaped
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), sig) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("failed to signal process group {pid}: {e}")),
        }
    }
}

#[async_trait]
impl RunnerSession for ProcessSession {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>> {
        self.child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncWrite + Unpin + Send>)
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn signal(&mut self, signal: Signal) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::Signal as NixSignal;
            match signal {
                Signal::Term => self.signal_group(NixSignal::SIGTERM),
                Signal::Kill => {
                    self.signal_group(NixSignal::SIGKILL)?;
                    // the leader may have left its group; make sure it goes too
                    let _ = self.child.start_kill();
                    Ok(())
                }
            }
        }
        #[cfg(not(unix))]
        {
            // no graceful request on this platform, both signals kill
            let _ = signal;
            self.child.start_kill()?;
            Ok(())
        }
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(normalize_exit(status))
    }
}
