//! External command execution
//!
//! All interaction with the USB/IP control utility goes through
//! [`CommandRunner`], so the dispatcher can be driven by a scripted runner in
//! tests and by [`SystemRunner`] in production.

use crate::error::CommandError;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// True if either stream contains `marker`
    pub fn diagnostics_contain(&self, marker: &str) -> bool {
        self.stdout.contains(marker) || self.stderr.contains(marker)
    }
}

/// Runs external programs
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// `program arg1 arg2 ...` for logs and lookup keys
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs programs with `tokio::process`, without a shell
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    prefix: Vec<String>,
    timeout: Option<Duration>,
    quiet: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a privilege helper (e.g. `["sudo", "-n"]`) to every command
    pub fn with_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Do not log nonzero exits
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn build(&self, program: &str, args: &[&str]) -> Command {
        let mut command = match self.prefix.split_first() {
            Some((helper, helper_args)) => {
                let mut command = Command::new(helper);
                command.args(helper_args).arg(program);
                command
            }
            None => Command::new(program),
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace('\r', "")
        .trim()
        .to_string()
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let line = command_line(program, args);
        debug!("Running: {}", line);

        let child_output = self.build(program, args).output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child_output)
                .await
                .map_err(|_| CommandError::TimedOut {
                    command: line.clone(),
                    timeout: limit,
                })?,
            None => child_output.await,
        }
        .map_err(|source| CommandError::Spawn {
            command: line.clone(),
            source,
        })?;

        let output = CommandOutput {
            status: output.status.code(),
            stdout: decode(&output.stdout),
            stderr: decode(&output.stderr),
        };

        if !output.success() && !self.quiet {
            warn!(
                "'{}' exited with {:?}: {}",
                line,
                output.status,
                if output.stderr.is_empty() {
                    &output.stdout
                } else {
                    &output.stderr
                }
            );
        }

        Ok(output)
    }
}
