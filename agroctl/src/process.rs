//! External command execution
//!
//! Every interaction with `docker`, `kubectl`, `git` and friends goes through
//! [`CommandRunner`] so the orchestration logic can be driven by a scripted
//! runner in tests.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::OpsError;

/// A command line to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    /// Extra environment; kept out of [`CommandSpec::display`]
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
            stdin: None,
            env: Vec::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    /// `program arg1 arg2 ...`, for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn a non-zero exit into [`OpsError::CommandFailed`]
    pub fn check(self, program: &str) -> Result<CommandOutput, OpsError> {
        if self.success() {
            Ok(self)
        } else {
            Err(OpsError::CommandFailed {
                program: program.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external commands to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command and capture its output.
    ///
    /// A non-zero exit is reported in [`CommandOutput::code`], not as an error;
    /// `Err` means the program could not be started at all.
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, OpsError>;

    /// Run the command and fail on non-zero exit
    async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput, OpsError> {
        let program = spec.program.clone();
        self.run(spec).await?.check(&program)
    }
}

/// [`CommandRunner`] backed by real child processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, OpsError> {
        debug!("Running: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut child = command.spawn()?;

        // Feed stdin concurrently so a child that writes while reading cannot
        // fill its stdout pipe and stall. Dropping the handle closes stdin.
        let writer = match (spec.stdin, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&input).await
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The exit code below is the more useful signal.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", spec.program);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(OpsError::Internal(format!("stdin writer failed: {}", e)));
                }
            }
        }
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        })
    }
}
