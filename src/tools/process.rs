//! Process Spawning
//!
//! All child processes are started through the [`ProcessRunner`] trait so the
//! executor can be exercised with a test double. [`TokioRunner`] is the real
//! implementation: no shell, a cleared environment, a hard timeout and a
//! per-stream output cap.

use super::shell::{EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND, LAUNCH_FAILURE_MARKER};
use super::timeout::ExecutionTimeout;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

const ENOENT: i32 = 2;
const EACCES: i32 = 13;

/// One fully-specified process launch
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Program to start (absolute path, or a bare name resolved via `env["PATH"]`)
    pub program: PathBuf,

    /// Argument vector, passed without shell interpretation
    pub args: Vec<String>,

    /// Working directory of the child
    pub current_dir: Option<PathBuf>,

    /// Complete environment of the child (nothing else is inherited)
    pub env: BTreeMap<String, String>,

    /// Hard time bound
    pub timeout: ExecutionTimeout,

    /// Maximum bytes buffered per output stream
    pub max_output: usize,
}

/// Captured result of a process that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Exit code (None if terminated by a signal)
    pub exit_code: Option<i32>,

    /// Whether the process exited successfully
    pub success: bool,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,
}

/// Why a process could not produce a [`ProcessOutput`]
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} could not be started by the shell (exit code {exit_code})")]
    MissingBinary {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("output exceeded the {0} byte limit")]
    OutputLimitExceeded(usize),

    #[error("I/O error while running process: {0}")]
    Io(#[from] io::Error),
}

impl RunError {
    /// Whether the executable was missing (or not executable) at spawn time
    pub fn is_missing_binary(&self) -> bool {
        match self {
            RunError::Spawn { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            RunError::MissingBinary { .. } => true,
            _ => false,
        }
    }

    /// Underlying OS error code, when one is known
    pub fn os_error(&self) -> Option<i32> {
        match self {
            RunError::Spawn { source, .. } => source.raw_os_error(),
            RunError::MissingBinary { exit_code, .. } => match *exit_code {
                EXIT_NOT_FOUND => Some(ENOENT),
                EXIT_NOT_EXECUTABLE => Some(EACCES),
                _ => None,
            },
            RunError::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// Map the launch guard's "cannot run" exits onto [`RunError::MissingBinary`]
    ///
    /// A 126 or 127 without the guard's marker came from the tool itself and
    /// stays an ordinary failed run.
    pub(crate) fn from_shell_output(program: &str, output: &ProcessOutput) -> Option<Self> {
        let guarded = output
            .stderr
            .lines()
            .any(|line| line.starts_with(LAUNCH_FAILURE_MARKER));
        if !guarded {
            return None;
        }
        match output.exit_code {
            Some(code @ (EXIT_NOT_FOUND | EXIT_NOT_EXECUTABLE)) => Some(RunError::MissingBinary {
                program: program.to_string(),
                exit_code: code,
                stderr: output.stderr.clone(),
            }),
            _ => None,
        }
    }
}

/// Capability to start child processes
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, buffering output
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError>;

    /// Start without waiting; the child outlives the call. Returns its PID.
    async fn spawn_detached(&self, invocation: &Invocation) -> Result<u32, RunError>;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioRunner;

impl TokioRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(invocation: &Invocation) -> TokioCommand {
        let mut command = TokioCommand::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(&invocation.env)
            .stdin(Stdio::null());
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(invocation: &Invocation, source: io::Error) -> RunError {
        RunError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError> {
        let mut command = Self::command(invocation);
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Self::spawn_error(invocation, e))?;
        debug!(program = %invocation.program.display(), pid = ?child.id(), "Spawned process");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;
        let max_output = invocation.max_output;

        let outcome = invocation
            .timeout
            .run(async {
                tokio::try_join!(
                    read_capped(stdout, max_output),
                    read_capped(stderr, max_output),
                    async { child.wait().await.map_err(RunError::from) },
                )
            })
            .await;

        match outcome {
            Ok((stdout, stderr, status)) => Ok(ProcessOutput {
                exit_code: status.code(),
                success: status.success(),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            }),
            Err(e) => {
                warn!(program = %invocation.program.display(), error = %e, "Killing process");
                let _ = child.kill().await;
                Err(e)
            }
        }
    }

    async fn spawn_detached(&self, invocation: &Invocation) -> Result<u32, RunError> {
        let mut command = Self::command(invocation);
        command.stdout(Stdio::null()).stderr(Stdio::null());

        let child = command
            .spawn()
            .map_err(|e| Self::spawn_error(invocation, e))?;
        let pid = child.id().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "detached process exited before reporting a pid")
        })?;
        debug!(program = %invocation.program.display(), pid, "Detached process");
        Ok(pid)
    }
}

/// Read a stream to the end, failing once it exceeds `max` bytes
async fn read_capped<R>(reader: R, max: usize) -> Result<Vec<u8>, RunError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.take(max as u64 + 1).read_to_end(&mut buf).await?;
    if buf.len() > max {
        return Err(RunError::OutputLimitExceeded(max));
    }
    Ok(buf)
}
