//! External Command Runner: start a program, block until it exits, report
//! its exit code. No timeout is applied here.

use std::process::Command;

use log::debug;

use crate::error::RunError;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hidden,
    Visible,
}

/// One external program invocation. `args` is a single argument string,
/// passed through verbatim on Windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: String,
    pub window: Window,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: impl Into<String>) -> Self {
        Self { program: program.into(), args: args.into(), window: Window::Hidden, env: Vec::new() }
    }

    /// `powershell.exe -NoProfile -Command <script>`, hidden.
    pub fn powershell(script: &str) -> Self {
        Self::new("powershell.exe", format!("-NoProfile -Command {}", script))
    }

    pub fn visible(mut self) -> Self {
        self.window = Window::Visible;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() { self.program.clone() } else { format!("{} {}", self.program, self.args) }
    }
}

pub trait CommandRunner: Send + Sync {
    /// `Ok(code)` whenever the program ran, whatever the code.
    fn run(&self, inv: &Invocation) -> Result<i32, RunError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, inv: &Invocation) -> Result<i32, RunError> {
        debug!("exec: {}", inv.display());
        let mut cmd = Command::new(&inv.program);
        apply_args(&mut cmd, inv);
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().map_err(|source| RunError::Launch { program: inv.program.clone(), source })?;
        let status = child.wait().map_err(|source| RunError::Wait { program: inv.program.clone(), source })?;
        status.code().ok_or_else(|| RunError::NoExitCode { program: inv.program.clone() })
    }
}

#[cfg(windows)]
fn apply_args(cmd: &mut Command, inv: &Invocation) {
    if !inv.args.is_empty() {
        cmd.raw_arg(&inv.args);
    }
    if inv.window == Window::Hidden {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
}

#[cfg(not(windows))]
fn apply_args(cmd: &mut Command, inv: &Invocation) {
    cmd.args(inv.args.split_whitespace());
}

/// Quote a path for a single-quoted PowerShell string literal.
pub fn ps_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
