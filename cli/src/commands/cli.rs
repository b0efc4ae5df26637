use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "runwarden", version, about = "Run scripts under screening, limits and progress tracking")]
pub struct Args {
    /// Config file to use instead of ~/.runwarden/config.toml or ./runwarden.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    pub script: PathBuf,

    /// Shell to run the script with; defaults to execution.defaultShell.
    #[arg(long)]
    pub shell: Option<String>,

    /// Timeout in seconds; 0 disables the timeout.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Script parameter (KEY=VALUE). Values that parse as JSON keep their type.
    /// Can be specified multiple times.
    #[arg(long = "param", action = clap::ArgAction::Append)]
    pub params: Vec<String>,

    /// Extra environment variables for the script (KEY=VALUE).
    /// Can be specified multiple times.
    #[arg(long = "env", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// File whose contents are written to the script's stdin.
    #[arg(long)]
    pub stdin_file: Option<PathBuf>,

    /// Do not draw a progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CheckArgs {
    pub script: PathBuf,

    /// Print the screening result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a script.
    Run(RunArgs),
    /// Screen a script without running it.
    Check(CheckArgs),
}
