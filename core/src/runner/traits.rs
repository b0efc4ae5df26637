use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::types::{RunnerStartArgs, Signal};

#[async_trait]
pub trait RunnerSession: Send {
    fn pid(&self) -> Option<u32>;
    fn stdin(&mut self) -> Option<Box<dyn AsyncWrite + Unpin + Send>>;
    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    async fn signal(&mut self, signal: Signal) -> anyhow::Result<()>;
    /// Wait for exit and return the normalised exit code.
    async fn wait(&mut self) -> anyhow::Result<i32>;
}

#[async_trait]
pub trait RunnerPlugin: Send + Sync {
    fn name(&self) -> &str;
    async fn start_session(&self, args: &RunnerStartArgs)
        -> anyhow::Result<Box<dyn RunnerSession>>;
}
