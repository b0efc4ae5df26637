pub mod process;

pub use process::ProcessRunnerPlugin;
