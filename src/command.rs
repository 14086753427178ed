//! External process execution for post-processing (VCS moves and commits).
//!
//! The child's stdout and stderr are drained on two scoped threads while the
//! calling thread waits for exit. A child writing more than a pipe buffer's
//! worth to an unread pipe would otherwise block forever. Both drain threads
//! are joined before the exit status is inspected, so a failure report always
//! carries the complete stderr.
//!
//! There is no timeout: a hung child blocks the run.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("IO error while running command: {0}")]
    Io(#[from] io::Error),
}

/// A program invocation, built up front so it can be logged and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs. Mocked in tests.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs programs with `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let command = spec.to_string();
        debug!(%command, "running external command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, stdout, stderr) = thread::scope(|scope| {
            let out = scope.spawn(|| drain(stdout, "stdout"));
            let err = scope.spawn(|| drain(stderr, "stderr"));
            let status = child.wait();
            let stdout = join(out);
            let stderr = join(err);
            (status, stdout, stderr)
        });
        let status = status?;
        let output = CommandOutput {
            stdout: stdout?,
            stderr: stderr?,
        };

        if !status.success() {
            return Err(CommandError::Failed {
                command,
                status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Read a child pipe to the end, logging each line as it arrives.
fn drain(pipe: Option<impl Read>, stream: &'static str) -> io::Result<String> {
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };
    let mut reader = BufReader::new(pipe);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        debug!(stream, "{}", text.trim_end());
        collected.push_str(&text);
    }
    Ok(collected)
}

fn join(handle: thread::ScopedJoinHandle<'_, io::Result<String>>) -> io::Result<String> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output drain thread panicked")))
}
