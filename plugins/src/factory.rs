use std::sync::Arc;

use runwarden_core::config::AppConfig;
use runwarden_core::fs::FileSystem;
use runwarden_core::runner::RunnerPlugin;
use runwarden_core::Coordinator;

use crate::fs::LocalFileSystem;
use crate::runner::ProcessRunnerPlugin;

pub fn build_runner(_cfg: &AppConfig) -> Arc<dyn RunnerPlugin> {
    Arc::new(ProcessRunnerPlugin::new())
}

pub fn build_fs(_cfg: &AppConfig) -> Arc<dyn FileSystem> {
    Arc::new(LocalFileSystem)
}

/// Wire a coordinator with the local process runner and disk access.
/// Must be called inside a tokio runtime when progress tracking is enabled.
pub fn build_coordinator(cfg: &AppConfig) -> Coordinator {
    Coordinator::new(
        cfg.execution.clone(),
        cfg.progress.clone(),
        build_runner(cfg),
        build_fs(cfg),
    )
}
