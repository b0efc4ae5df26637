//! Script path checks. Everything that can be decided lexically is decided
//! before the file system is touched.

use std::path::{Component, Path, PathBuf};

use crate::config::ExecutionConfig;
use crate::error::ExecutionError;
use crate::fs::FileSystem;

/// Resolve `.` and `..` without following symlinks. `..` never climbs above
/// the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        normalized
    }
}

/// Absolute, normalised form of `path`. Relative paths are anchored at
/// `anchor`, or at the process working directory.
pub fn absolutize(path: &Path, anchor: Option<&Path>) -> Result<PathBuf, ExecutionError> {
    if path.is_absolute() {
        return Ok(normalize_lexically(path));
    }
    let base = match anchor {
        Some(a) if a.is_absolute() => a.to_path_buf(),
        Some(a) => std::env::current_dir()?.join(a),
        None => std::env::current_dir()?,
    };
    Ok(normalize_lexically(&base.join(path)))
}

pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    allowed.iter().any(|a| {
        let a = a.strip_prefix('.').unwrap_or(a);
        a.eq_ignore_ascii_case(ext)
    })
}

/// Validate a script path and return its normalised absolute form.
pub async fn validate_script_path(
    config: &ExecutionConfig,
    fs: &dyn FileSystem,
    path: &Path,
) -> Result<PathBuf, ExecutionError> {
    if path.as_os_str().is_empty() {
        return Err(ExecutionError::validation("script path is empty"));
    }

    if !has_allowed_extension(path, &config.allowed_extensions) {
        return Err(ExecutionError::validation(format!(
            "file extension of '{}' is not allowed (allowed: {})",
            path.display(),
            config.allowed_extensions.join(", ")
        )));
    }

    let base = match (config.restrict_to_base_path, config.base_path.as_deref()) {
        (true, Some(base)) if !base.trim().is_empty() => Some(absolutize(Path::new(base), None)?),
        (true, _) => {
            return Err(ExecutionError::validation(
                "base path restriction is enabled but no base path is configured",
            ))
        }
        (false, _) => None,
    };

    let resolved = absolutize(path, base.as_deref())?;
    if let Some(base) = &base {
        if !resolved.starts_with(base) {
            return Err(ExecutionError::validation(format!(
                "script path '{}' is outside the allowed base path '{}'",
                path.display(),
                base.display()
            )));
        }
    }

    if !fs.exists(&resolved).await {
        return Err(ExecutionError::validation(format!(
            "script file not found: {}",
            resolved.display()
        )));
    }

    if let Some(limit) = config.resource_limits.max_file_size_bytes {
        let size = fs.file_size(&resolved).await?;
        if size > limit {
            return Err(ExecutionError::validation(format!(
                "script file is {size} bytes, larger than the {limit} byte limit"
            )));
        }
    }

    Ok(resolved)
}
