use std::path::{Path, PathBuf};

use crate::fs::FileSystem;

use super::types::ExecutionResult;

/// `{dir}/{id}_{YYYYMMDDTHHMMSSmmm}.json`
pub fn result_file_path(dir: &Path, result: &ExecutionResult) -> PathBuf {
    let stamp = result.end_time.format("%Y%m%dT%H%M%S%3f");
    dir.join(format!("{}_{}.json", result.id, stamp))
}

/// Write `result` as pretty JSON, creating `dir` on demand.
pub async fn save_result(
    fs: &dyn FileSystem,
    dir: &Path,
    result: &ExecutionResult,
) -> anyhow::Result<PathBuf> {
    fs.create_dir_all(dir).await?;
    let path = result_file_path(dir, result);
    let json = serde_json::to_vec_pretty(result)?;
    fs.write(&path, &json).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_carries_id_and_millis() {
        let end = chrono::Utc
            .with_ymd_and_hms(2024, 3, 5, 7, 8, 9)
            .unwrap()
            + chrono::Duration::milliseconds(42);
        let result = ExecutionResult {
            id: "exec-1".into(),
            success: true,
            output: String::new(),
            stderr: String::new(),
            error: None,
            failure_kind: None,
            exit_code: Some(0),
            duration_ms: 1,
            script_path: "/s/a.sh".into(),
            parameters: Default::default(),
            shell: "bash".into(),
            working_directory: "/s".into(),
            start_time: end,
            end_time: end,
            output_length: 0,
            truncated: false,
        };
        assert_eq!(
            result_file_path(Path::new("/out"), &result),
            PathBuf::from("/out/exec-1_20240305T070809042.json")
        );
    }
}
