//! Bounded-timeout shell command execution.
//!
//! Stdout is accumulated line by line while a timer runs; whichever of
//! "stdout closed" and "timer elapsed" happens first decides the outcome.
//! A timeout is a normal result carrying the partial output, not an error.

use std::{
    io,
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::Command,
    task::JoinHandle,
    time::Instant,
};

use crate::shell::get_shell_command;

/// Timeout applied when the caller does not give one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// How long to let the readers drain after the process is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on how far ahead a command deadline is placed.
const MAX_TIMEOUT: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + MAX_TIMEOUT)
}

/// Execution error.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start command: {0}")]
    Spawn(io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{}", exit_message(*.code, .stderr))]
    NonZeroExit { code: i32, stderr: String },
    #[error("terminated by signal")]
    Terminated,
}

fn exit_message(code: i32, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exit status {code}")
    } else {
        format!("exit status {code}: {stderr}")
    }
}

/// A finished command: normal completion or timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Captured stdout, one `\n`-terminated entry per line. On timeout the
    /// notice is appended.
    pub output: String,
    pub timed_out: bool,
}

/// A failed command, with whatever stdout it produced before failing.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecFailure {
    pub output: String,
    pub error: ExecError,
}

/// Runs command lines through the platform interpreter.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl CommandExecutor {
    /// Create an executor with the given default timeout.
    #[must_use]
    pub const fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Default timeout in whole seconds.
    #[must_use]
    pub const fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Execute `command` with the executor's default timeout.
    ///
    /// # Errors
    /// Returns `ExecFailure` if the command cannot be started, exits
    /// unsuccessfully, or its output cannot be read.
    pub async fn execute(&self, command: &str) -> Result<CommandOutcome, ExecFailure> {
        self.execute_with_timeout(command, self.timeout.as_secs()).await
    }

    /// Execute `command`, killing it after `timeout_secs`.
    ///
    /// # Errors
    /// See [`execute`](Self::execute).
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutcome, ExecFailure> {
        let deadline = deadline_after(Duration::from_secs(timeout_secs));
        let (shell, shell_arg) = get_shell_command().await;

        let mut cmd = Command::new(&shell);
        cmd.arg(shell_arg)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.group_spawn().map_err(|e| ExecFailure {
            output: String::new(),
            error: ExecError::Spawn(e),
        })?;
        tracing::debug!(command, pid = ?child.id(), timeout_secs, "Spawned command");

        let captured = Arc::new(Mutex::new(String::new()));
        let mut stdout_task = child
            .inner()
            .stdout
            .take()
            .map(|stdout| tokio::spawn(capture_lines(stdout, Arc::clone(&captured))));
        let stderr_task = child.inner().stderr.take().map(|stderr| tokio::spawn(read_all(stderr)));

        let stdout_done = async {
            match stdout_task.as_mut() {
                Some(task) => task.await.map_err(io::Error::other).and_then(|r| r),
                None => Ok(()),
            }
        };

        let finished = tokio::select! {
            result = stdout_done => Some(result),
            () = tokio::time::sleep_until(deadline) => None,
        };

        let outcome = match finished {
            Some(Ok(())) => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) if status.success() => Ok(false),
                Ok(Ok(status)) => Err(match status.code() {
                    Some(code) => ExecError::NonZeroExit {
                        code,
                        stderr: drain(stderr_task).await,
                    },
                    None => ExecError::Terminated,
                }),
                Ok(Err(e)) => Err(ExecError::Io(e)),
                // Stdout closed but the process is still running.
                Err(_) => {
                    kill(&mut child).await;
                    Ok(true)
                }
            },
            Some(Err(e)) => {
                kill(&mut child).await;
                Err(ExecError::Io(e))
            }
            None => {
                kill(&mut child).await;
                if let Some(task) = stdout_task {
                    finish_or_abort(task).await;
                }
                Ok(true)
            }
        };

        let mut output = std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner));
        match outcome {
            Ok(timed_out) => {
                if timed_out {
                    tracing::info!(command, timeout_secs, "Command timed out");
                    output.push_str(&format!("\nCommand timed out after {timeout_secs} seconds"));
                }
                Ok(CommandOutcome { output, timed_out })
            }
            Err(error) => {
                tracing::debug!(command, %error, "Command failed");
                Err(ExecFailure { output, error })
            }
        }
    }
}

async fn capture_lines<R>(reader: R, captured: Arc<Mutex<String>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        let mut out = captured.lock().unwrap_or_else(PoisonError::into_inner);
        out.push_str(line);
        out.push('\n');
    }
}

async fn read_all<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    match task {
        Some(task) => tokio::time::timeout(DRAIN_GRACE, task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => String::new(),
    }
}

async fn finish_or_abort<T>(mut task: JoinHandle<T>) {
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        task.abort();
    }
}

async fn kill(child: &mut AsyncGroupChild) {
    if let Err(e) = child.kill().await {
        tracing::warn!(pid = ?child.id(), error = %e, "Failed to kill command process group");
    }
}
