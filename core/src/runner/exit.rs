/// Map an exit status to a single code: the process code when present, `128 +
/// signal` for signal-terminated processes on unix, `-1` otherwise.
pub fn normalize_exit(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(sig) = status.signal() {
            128 + sig
        } else {
            -1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}
