use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use super::{render_value, CommandBuilder, CommandSpec};

fn script_arg(script: &Path) -> String {
    script.to_string_lossy().into_owned()
}

/// `--key value` pairs; `true` booleans become bare flags, `false` is dropped.
fn gnu_style_args(params: &BTreeMap<String, Value>) -> Vec<String> {
    let mut args = Vec::with_capacity(params.len() * 2);
    for (key, value) in params {
        match value {
            Value::Bool(true) => args.push(format!("--{key}")),
            Value::Bool(false) | Value::Null => {}
            other => {
                args.push(format!("--{key}"));
                args.push(render_value(other));
            }
        }
    }
    args
}

pub struct PosixShellBuilder {
    shell: &'static str,
}

impl PosixShellBuilder {
    pub fn bash() -> Self {
        Self { shell: "bash" }
    }

    pub fn sh() -> Self {
        Self { shell: "sh" }
    }

    pub fn zsh() -> Self {
        Self { shell: "zsh" }
    }
}

impl CommandBuilder for PosixShellBuilder {
    fn shell(&self) -> &'static str {
        self.shell
    }

    fn build(&self, script: &Path, params: &BTreeMap<String, Value>) -> CommandSpec {
        let mut args = vec![script_arg(script)];
        args.extend(gnu_style_args(params));
        CommandSpec {
            program: self.shell.to_string(),
            args,
        }
    }
}

pub struct PowerShellBuilder {
    shell: &'static str,
    program: &'static str,
}

impl PowerShellBuilder {
    pub fn windows_powershell() -> Self {
        Self {
            shell: "powershell",
            program: "powershell.exe",
        }
    }

    pub fn core() -> Self {
        Self {
            shell: "pwsh",
            program: "pwsh",
        }
    }
}

impl CommandBuilder for PowerShellBuilder {
    fn shell(&self) -> &'static str {
        self.shell
    }

    fn build(&self, script: &Path, params: &BTreeMap<String, Value>) -> CommandSpec {
        let mut args: Vec<String> = [
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-File",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(script_arg(script));

        for (key, value) in params {
            match value {
                Value::Bool(b) => args.push(format!("-{key}:${b}")),
                Value::Null => {}
                other => {
                    args.push(format!("-{key}"));
                    args.push(render_value(other));
                }
            }
        }

        CommandSpec {
            program: self.program.to_string(),
            args,
        }
    }
}

pub struct CmdBuilder;

impl CommandBuilder for CmdBuilder {
    fn shell(&self) -> &'static str {
        "cmd"
    }

    fn build(&self, script: &Path, params: &BTreeMap<String, Value>) -> CommandSpec {
        let mut args = vec!["/D".to_string(), "/C".to_string(), script_arg(script)];
        for (key, value) in params {
            if value.is_null() {
                continue;
            }
            args.push(format!("{key}={}", render_value(value)));
        }
        CommandSpec {
            program: "cmd.exe".to_string(),
            args,
        }
    }
}

pub struct PythonBuilder;

impl CommandBuilder for PythonBuilder {
    fn shell(&self) -> &'static str {
        "python"
    }

    fn build(&self, script: &Path, params: &BTreeMap<String, Value>) -> CommandSpec {
        let program = if cfg!(windows) { "python" } else { "python3" };
        let mut args = vec!["-u".to_string(), script_arg(script)];
        args.extend(gnu_style_args(params));
        CommandSpec {
            program: program.to_string(),
            args,
        }
    }
}

pub struct NodeBuilder;

impl CommandBuilder for NodeBuilder {
    fn shell(&self) -> &'static str {
        "node"
    }

    fn build(&self, script: &Path, params: &BTreeMap<String, Value>) -> CommandSpec {
        let mut args = vec![script_arg(script)];
        args.extend(gnu_style_args(params));
        CommandSpec {
            program: "node".to_string(),
            args,
        }
    }
}
