//! External tool command building and running.
//!
//! Every external capability (ffmpeg, ffprobe, the neural upscaler) shares
//! one invocation protocol: spawn, stream stderr as it arrives, honor
//! cancellation and a timeout by killing the child, and report non-zero
//! exits with a captured stderr tail.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Number of trailing stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Callback receiving streamed output lines from a running tool.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Builder for an external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Create a new command for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn path_arg(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// The program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The argument list.
    pub fn args_ref(&self) -> &[String] {
        &self.args
    }

    /// Render the full command line for logging.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Per-invocation control handle: cancellation flag, timeout, log sink.
///
/// Cloned into every stage so a single watch sender cancels all in-flight
/// invocations of a job.
#[derive(Clone, Default)]
pub struct InvocationCtl {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
    log_sink: Option<LogSink>,
}

impl InvocationCtl {
    /// Create a control handle with no cancellation, timeout or sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set the invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the callback receiving streamed output lines.
    pub fn with_log_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log_sink = Some(Arc::new(sink));
        self
    }

    /// True when cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }
}

/// Runner executing [`ToolCommand`]s under an [`InvocationCtl`].
pub struct ToolRunner {
    ctl: InvocationCtl,
}

impl ToolRunner {
    /// Create a runner from a control handle.
    pub fn new(ctl: InvocationCtl) -> Self {
        Self { ctl }
    }

    /// Run a command to completion.
    ///
    /// Stdout and stderr are streamed line-by-line into the control handle's
    /// log sink as they arrive; the last lines of stderr are retained and
    /// attached to the error on a non-zero exit. Cancellation and timeout
    /// kill the child process.
    pub async fn run(&self, cmd: &ToolCommand) -> MediaResult<()> {
        if self.ctl.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        debug!("Running tool: {}", cmd.command_line());

        let mut child = Command::new(cmd.program())
            .args(cmd.args_ref())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout not captured");
        let stderr = child.stderr.take().expect("stderr not captured");

        let stdout_task = tokio::spawn(stream_lines(stdout, self.ctl.log_sink.clone(), 0));
        let stderr_task = tokio::spawn(stream_lines(
            stderr,
            self.ctl.log_sink.clone(),
            STDERR_TAIL_LINES,
        ));

        let outcome = self.wait_for_exit(&mut child).await;

        let _ = stdout_task.await;
        let tail = stderr_task.await.unwrap_or_default();

        match outcome {
            WaitOutcome::Cancelled => Err(MediaError::Cancelled),
            WaitOutcome::TimedOut(secs) => Err(MediaError::Timeout(secs)),
            WaitOutcome::Exited(status) if status.success() => Ok(()),
            WaitOutcome::Exited(status) => Err(MediaError::tool_failed(
                cmd.program(),
                "exited with non-zero status",
                if tail.is_empty() {
                    None
                } else {
                    Some(tail.join("\n"))
                },
                status.code(),
            )),
            WaitOutcome::WaitError(e) => Err(MediaError::Io(e)),
        }
    }

    /// Wait for the child, killing it on cancellation or timeout.
    async fn wait_for_exit(&self, child: &mut tokio::process::Child) -> WaitOutcome {
        let mut cancel_rx = self.ctl.cancel_rx.clone();
        let timeout = self.ctl.timeout;

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WaitOutcome::Exited(status),
                Err(e) => WaitOutcome::WaitError(e),
            },
            _ = cancel_requested(&mut cancel_rx) => {
                let _ = child.kill().await;
                WaitOutcome::Cancelled
            }
            _ = expiry(timeout) => {
                let _ = child.kill().await;
                WaitOutcome::TimedOut(timeout.map(|d| d.as_secs()).unwrap_or(0))
            }
        }
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    Cancelled,
    TimedOut(u64),
    WaitError(std::io::Error),
}

/// Resolves when the cancel flag becomes true; never resolves without one.
async fn cancel_requested(cancel_rx: &mut Option<watch::Receiver<bool>>) {
    match cancel_rx {
        Some(rx) => {
            if *rx.borrow() {
                return;
            }
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return;
                }
            }
            // Sender dropped without cancelling
            std::future::pending::<()>().await
        }
        None => std::future::pending::<()>().await,
    }
}

/// Resolves when the timeout expires; never resolves without one.
async fn expiry(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Forward lines from a child pipe into the sink, retaining a bounded tail.
async fn stream_lines(
    pipe: impl AsyncRead + Unpin,
    sink: Option<LogSink>,
    tail_capacity: usize,
) -> Vec<String> {
    let mut lines = BufReader::new(pipe).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(tail_capacity);

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(sink) = &sink {
            sink(trimmed);
        }
        if tail_capacity > 0 {
            if tail.len() == tail_capacity {
                tail.pop_front();
            }
            tail.push_back(trimmed.to_string());
        }
    }

    tail.into_iter().collect()
}

/// Check that an external tool is available on PATH.
pub fn check_tool(name: &'static str) -> MediaResult<PathBuf> {
    which::which(name).map_err(|_| MediaError::ToolNotFound(name))
}
