use std::path::{Path, PathBuf};

use super::types::AppConfig;

/// Get the default runwarden data directory: ~/.runwarden
pub fn get_runwarden_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".runwarden"))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.runwarden/config.toml (highest)
    let data_dir = get_runwarden_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./runwarden.toml (current directory)
    let local_config = Path::new("runwarden.toml");

    let mut cfg = if user_config.exists() {
        parse_file(&user_config)?
    } else if local_config.exists() {
        parse_file(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg);
    expand_paths(&mut cfg)?;
    Ok(cfg)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let mut cfg = parse_file(path)?;
    apply_env_overrides(&mut cfg);
    expand_paths(&mut cfg)?;
    Ok(cfg)
}

fn parse_file(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read config {} failed: {e}", path.display()))?;
    let cfg = toml::from_str::<AppConfig>(&s)
        .map_err(|e| anyhow::anyhow!("parse config {} failed: {e}", path.display()))?;
    Ok(cfg)
}

// Environment variable overrides (Priority 0: highest)
fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("RUNWARDEN_DEFAULT_SHELL") {
        if !v.trim().is_empty() {
            cfg.execution.default_shell = v.trim().to_string();
        }
    }
    if let Ok(v) = std::env::var("RUNWARDEN_MAX_CONCURRENT_SCRIPTS") {
        match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => cfg.execution.max_concurrent_scripts = n,
            _ => tracing::warn!(
                error.kind = "config.env_invalid",
                var = "RUNWARDEN_MAX_CONCURRENT_SCRIPTS",
                value = %v
            ),
        }
    }
    if let Ok(v) = std::env::var("RUNWARDEN_OUTPUT_DIR") {
        if !v.trim().is_empty() {
            cfg.execution.output_directory = v;
        }
    }
}

fn expand_paths(cfg: &mut AppConfig) -> anyhow::Result<()> {
    if let Some(base) = cfg.execution.base_path.as_mut() {
        *base = shellexpand::tilde(base.as_str()).into_owned();
    }
    cfg.execution.output_directory = shellexpand::tilde(&cfg.execution.output_directory).into_owned();
    if let Some(dir) = cfg.logging.directory.as_mut() {
        *dir = shellexpand::tilde(dir.as_str()).into_owned();
    }

    if cfg.execution.restrict_to_base_path
        && cfg
            .execution
            .base_path
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
    {
        anyhow::bail!("restrictToBasePath is set but basePath is empty");
    }
    Ok(())
}
