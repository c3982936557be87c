//! Launching one external process and collecting its outcome.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use chrono::{DateTime, Local};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::defs::{PipelineError, TaskId};
use crate::utils::junction::FifoHold;

#[derive(Debug, Clone, PartialEq)]
pub enum StageStatus {
    Success,
    Failed { code: Option<i32>, signal: Option<i32> },
    LaunchError(String),
    TimedOut,
    /// I/O failure inside a builtin task.
    Errored(String),
}

impl StageStatus {
    pub fn from_exit(status: ExitStatus) -> Self {
        if status.success() {
            StageStatus::Success
        } else {
            StageStatus::Failed { code: status.code(), signal: status.signal() }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Success => f.write_str("ok"),
            StageStatus::Failed { code: Some(code), .. } => write!(f, "exit code {}", code),
            StageStatus::Failed { signal: Some(signal), .. } => write!(f, "killed by signal {}", signal),
            StageStatus::Failed { .. } => f.write_str("failed"),
            StageStatus::LaunchError(e) => write!(f, "launch error: {}", e),
            StageStatus::TimedOut => f.write_str("timed out"),
            StageStatus::Errored(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub task: TaskId,
    pub status: StageStatus,
    pub stderr: Vec<u8>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl StageResult {
    /// Result for a task that never got a process.
    pub fn not_started(task: TaskId, status: StageStatus) -> Self {
        let now = Local::now();
        StageResult { task, status, stderr: Vec::new(), started_at: now, finished_at: now }
    }

    pub fn launch_error(task: TaskId, error: &PipelineError) -> Self {
        StageResult::not_started(task, StageStatus::LaunchError(error.to_string()))
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}


/// Resolves once the run is cancelled. A dropped sender means no cancellation will come.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|stop| *stop).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}


/// A spawned stage whose stderr is being drained in the background.
pub struct RunningStage {
    task: TaskId,
    child: Child,
    stderr_task: JoinHandle<std::io::Result<Vec<u8>>>,
    started_at: DateTime<Local>,
    /// The stage leads its own process group, so helpers it forks die with it.
    pgid: Option<Pid>,
    holds: Vec<FifoHold>,
}

/// Spawns one stage process bound to the given streams.
///
/// The `Command` (and with it the orchestrator's copies of `stdin`/`stdout`) is
/// dropped before returning, so the only open ends left belong to children.
///
/// # Arguments
///
/// * `task` - Which stage or sink this process is.
/// * `argv` - Executable followed by its arguments.
/// * `stdin` - Input end for the child.
/// * `stdout` - Output end for the child.
///
/// # Returns
/// Result<RunningStage, PipelineError>, `Launch` when the executable cannot be spawned.
pub fn start(task: TaskId, argv: &[String], stdin: Stdio, stdout: Stdio) -> Result<RunningStage, PipelineError> {
    let (program, args) = argv.split_first().ok_or_else(|| PipelineError::Launch {
        stage: task.to_string(),
        error: "empty command line".to_string(),
    })?;

    let mut child = {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        command.spawn().map_err(|e| PipelineError::Launch {
            stage: task.to_string(),
            error: format!("{}: {}", program, e),
        })?
    };
    let started_at = Local::now();
    let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
    debug!("Started {} (pid {:?})", task, child.id());

    let stderr_task = match child.stderr.take() {
        Some(mut stderr) => tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok(buf)
        }),
        None => tokio::spawn(async { Ok(Vec::new()) }),
    };

    Ok(RunningStage { task, child, stderr_task, started_at, pgid, holds: Vec::new() })
}

impl RunningStage {
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Attaches a FIFO hold that is released once this process exits.
    pub fn hold(&mut self, hold: FifoHold) {
        self.holds.push(hold);
    }

    /// SIGKILL to every process in the stage's group.
    fn kill_group(&self) {
        if let Some(pgid) = self.pgid {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group of {}: {}", self.task, e),
            }
        }
    }

    /// Waits for the process to exit (or kills its process group on cancellation)
    /// and collects its stderr. FIFO holds are released only after the exit is observed.
    pub async fn join(mut self, mut cancel: watch::Receiver<bool>) -> StageResult {
        let status = tokio::select! {
            waited = self.child.wait() => match waited {
                Ok(exit) => StageStatus::from_exit(exit),
                Err(e) => StageStatus::Errored(format!("wait failed: {}", e)),
            },
            _ = cancelled(&mut cancel) => {
                warn!("Killing {} on timeout", self.task);
                self.kill_group();
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill {}: {}", self.task, e);
                }
                StageStatus::TimedOut
            }
        };
        let finished_at = Local::now();

        // Leftover helpers may still hold stderr open after the stage exits.
        let captured = tokio::select! {
            joined = &mut self.stderr_task => joined,
            _ = cancelled(&mut cancel) => {
                self.kill_group();
                (&mut self.stderr_task).await
            }
        };
        let stderr = match captured {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => format!("<stderr capture failed: {}>", e).into_bytes(),
            Err(e) => format!("<stderr capture task failed: {}>", e).into_bytes(),
        };

        for hold in self.holds.drain(..) {
            debug!("Releasing {} held for {}", hold.id(), self.task);
        }

        debug!("{} finished: {}", self.task, status);
        StageResult { task: self.task, status, stderr, started_at: self.started_at, finished_at }
    }
}
