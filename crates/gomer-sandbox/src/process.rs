//! Process execution with combined output capture and deadline enforcement.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::errors::SandboxError;

/// How long pipes may stay open once the process group has been killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One process invocation.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    /// Program to execute (looked up on `PATH`).
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Wall-clock limit; the process is killed when it elapses.
    pub deadline: Option<Duration>,
}

impl CommandSpec {
    /// Build a spec from borrowed arguments.
    pub fn new(program: &str, args: &[&str], working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            working_dir: working_dir.into(),
            deadline: None,
        }
    }

    /// Attach a deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own.
    Exited {
        /// Whether the exit status was success.
        success: bool,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Combined stdout and stderr, in arrival order.
        output: String,
    },
    /// The deadline elapsed; the process group was killed and reaped.
    TimedOut {
        /// Whatever was captured before the kill.
        partial_output: String,
    },
}

/// Starts processes on behalf of the sandbox.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec` to completion or until its deadline.
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutcome, SandboxError>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
///
/// Each process leads its own process group so a deadline kill also reaches
/// anything it spawned (`go run` execs the built binary as a child).
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutcome, SandboxError> {
        let start = Instant::now();

        let mut cmd = Command::new(&spec.program);
        let _ = cmd
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        let _ = cmd.process_group(0);

        let command = spec.display();
        debug!(command = %command, working_dir = %spec.working_dir.display(), "spawning process");

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // The child leads its group; remember the id before `wait` clears it.
        let group = child.id();
        let combined = Arc::new(Mutex::new(Vec::new()));
        let mut readers = JoinSet::new();
        let _ = readers.spawn(drain(child.stdout.take(), combined.clone()));
        let _ = readers.spawn(drain(child.stderr.take(), combined.clone()));

        // Only the child itself is timed. Background processes it leaves
        // behind may keep the pipes open long after it exits.
        let waited = match spec.deadline {
            Some(deadline) => tokio::time::timeout(deadline, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let Some(status) = waited else {
            warn!(command = %command, deadline = ?spec.deadline, "process exceeded deadline, killing");
            kill_process_group(&mut child, group).await;
            finish_drains(&mut readers, DRAIN_GRACE).await;
            return Ok(ProcessOutcome::TimedOut {
                partial_output: take_output(&combined),
            });
        };

        // Leftover background children must not outlive the request.
        signal_group(group);
        let remaining = spec.deadline.map_or(DRAIN_GRACE, |deadline| {
            deadline.saturating_sub(start.elapsed()).max(DRAIN_GRACE)
        });
        finish_drains(&mut readers, remaining).await;

        let status = status.map_err(|source| SandboxError::Wait {
            program: spec.program.clone(),
            source,
        })?;
        let output = take_output(&combined);
        debug!(
            command = %command,
            exit_code = ?status.code(),
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "process completed"
        );

        Ok(ProcessOutcome::Exited {
            success: status.success(),
            code: status.code(),
            output,
        })
    }
}

/// Copy a pipe into the shared buffer until EOF.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, sink: Arc<Mutex<Vec<u8>>>) {
    let Some(mut reader) = reader else { return };
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
        }
    }
}

/// Wait up to `cap` for both pipes to reach EOF, then give up on them.
async fn finish_drains(readers: &mut JoinSet<()>, cap: Duration) {
    let all = async { while readers.join_next().await.is_some() {} };
    if tokio::time::timeout(cap, all).await.is_err() {
        debug!(?cap, "output pipes still open, abandoning");
        readers.abort_all();
    }
}

fn take_output(combined: &Mutex<Vec<u8>>) -> String {
    lossy(std::mem::take(&mut *combined.lock()))
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// SIGKILL the child's whole process group, then reap the child.
async fn kill_process_group(child: &mut Child, group: Option<u32>) {
    signal_group(group);
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "child already exited");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap killed process");
    }
}

/// SIGKILL every process left in `group`. A group that is already empty is fine.
fn signal_group(group: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = group
        .and_then(|id| i32::try_from(id).ok())
        .and_then(rustix::process::Pid::from_raw)
    {
        if let Err(e) = rustix::process::kill_process_group(pid, rustix::process::Signal::KILL) {
            debug!(error = %e, "process group already gone");
        }
    }
    #[cfg(not(unix))]
    let _ = group;
}
