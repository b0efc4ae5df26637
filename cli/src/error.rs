use runwarden_core::error::{ErrorKind, ExecutionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    Usage(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

// 2: validation / bad arguments
// 3: security screening rejected the script
// 4: too many scripts running
// 11: config error
// 50: internal/uncategorized
pub fn exit_code_for_error(e: &CliError) -> i32 {
    match e {
        CliError::Config(_) => 11,
        CliError::Usage(_) => 2,
        CliError::Execution(ee) => match ee.kind() {
            ErrorKind::Validation => 2,
            ErrorKind::Security => 3,
            ErrorKind::Capacity => 4,
            ErrorKind::Io => 50,
        },
        CliError::Io(_) => 50,
        CliError::Anyhow(_) => 50,
    }
}
