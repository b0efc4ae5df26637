//! Interpreter-specific command construction.
//!
//! Each supported shell identifier maps to one [`CommandBuilder`] that turns a
//! script path plus named parameters into a program and argument vector.

mod builders;

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

pub use builders::{CmdBuilder, NodeBuilder, PosixShellBuilder, PowerShellBuilder, PythonBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

pub trait CommandBuilder: Send + Sync {
    /// Canonical shell identifier, as used in configuration.
    fn shell(&self) -> &'static str;

    fn build(&self, script: &Path, params: &BTreeMap<String, Value>) -> CommandSpec;
}

pub const SUPPORTED_SHELLS: &[&str] = &[
    "bash",
    "sh",
    "zsh",
    "powershell",
    "pwsh",
    "cmd",
    "python",
    "node",
];

pub fn supported_shells() -> &'static [&'static str] {
    SUPPORTED_SHELLS
}

/// Look up the builder for a shell identifier (case-insensitive).
pub fn builder_for(shell: &str) -> Option<Box<dyn CommandBuilder>> {
    let builder: Box<dyn CommandBuilder> = match shell.trim().to_ascii_lowercase().as_str() {
        "bash" => Box::new(PosixShellBuilder::bash()),
        "sh" => Box::new(PosixShellBuilder::sh()),
        "zsh" => Box::new(PosixShellBuilder::zsh()),
        "powershell" => Box::new(PowerShellBuilder::windows_powershell()),
        "pwsh" => Box::new(PowerShellBuilder::core()),
        "cmd" => Box::new(CmdBuilder),
        "python" | "python3" => Box::new(PythonBuilder),
        "node" | "nodejs" => Box::new(NodeBuilder),
        _ => return None,
    };
    Some(builder)
}

/// Render a parameter value as a single command-line token.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}
