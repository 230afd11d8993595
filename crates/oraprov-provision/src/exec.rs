//! Process execution seam.
//!
//! Steps describe the commands they need as [`CommandSpec`] values and hand
//! them to a [`CommandRunner`]. The system runner spawns real processes;
//! tests substitute a recording fake.

use crate::error::{ProvisionError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A command to run: program, arguments, extra environment, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs(mut self, vars: &[(String, String)]) -> Self {
        self.env.extend(vars.iter().cloned());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Bare program name (`gunicorn` for `/opt/venv/bin/gunicorn`).
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Shell-like rendering for logs and plans.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args.iter().map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{}'", a)
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into `ProvisionError::Command`.
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(ProvisionError::Command {
            program: spec.program_name(),
            status: self
                .status
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion with captured output.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run in the foreground with inherited stdio and return its exit code.
    fn launch(&self, spec: &CommandSpec) -> Result<i32>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    /// On Unix, replace the current process on `launch` so the supervisor
    /// receives signals directly (PID 1 in containers).
    pub exec_on_launch: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exec(exec_on_launch: bool) -> Self {
        Self { exec_on_launch }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(cmd = %spec.display(), "running");
        let out = spec
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProvisionError::Spawn {
                program: spec.program_name(),
                source,
            })?;
        Ok(CommandOutput {
            status: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
        })
    }

    fn launch(&self, spec: &CommandSpec) -> Result<i32> {
        let mut cmd = spec.to_command();

        #[cfg(unix)]
        {
            if self.exec_on_launch {
                use std::os::unix::process::CommandExt;
                // Only returns on failure.
                let source = cmd.exec();
                return Err(ProvisionError::Spawn {
                    program: spec.program_name(),
                    source,
                });
            }
        }

        let status = cmd.status().map_err(|source| ProvisionError::Spawn {
            program: spec.program_name(),
            source,
        })?;
        Ok(exit_code(status))
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
