use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::defs::{PipelineError, StageName, TaskId};
use crate::pipelines::builder::{PipelineRun, StageSlot};
use crate::pipelines::sink;
use crate::utils::junction::{pipe_to_stdio, FifoHold};
use crate::utils::logs::CommandLog;
use crate::utils::runner::{self, StageResult, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureKind {
    /// Never started; a configuration-time problem such as a missing executable.
    Launch,
    /// Ran and exited non-zero or was killed by a signal.
    Exit,
    Timeout,
    /// A builtin task hit an I/O error.
    Io,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: TaskId,
    pub kind: FailureKind,
    pub detail: String,
    pub stderr: String,
}

/// Outcome of one run: every task's result plus the failing subset.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub success: bool,
    pub results: Vec<StageResult>,
    pub failures: Vec<TaskFailure>,
    pub bypassed: Vec<StageName>,
    /// Workspace teardown problems. Reported, but they do not change `success`.
    pub resource_errors: Vec<String>,
    pub workspace: PathBuf,
}

impl RunReport {
    pub fn from_results(results: Vec<StageResult>, bypassed: Vec<StageName>, workspace: PathBuf) -> Self {
        let failures: Vec<TaskFailure> = results
            .iter()
            .filter_map(|result| {
                let kind = match &result.status {
                    StageStatus::Success => return None,
                    StageStatus::Failed { .. } => FailureKind::Exit,
                    StageStatus::LaunchError(_) => FailureKind::Launch,
                    StageStatus::TimedOut => FailureKind::Timeout,
                    StageStatus::Errored(_) => FailureKind::Io,
                };
                Some(TaskFailure {
                    task: result.task,
                    kind,
                    detail: result.status.to_string(),
                    stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
                })
            })
            .collect();

        RunReport {
            success: failures.is_empty(),
            results,
            failures,
            bypassed,
            resource_errors: Vec::new(),
            workspace,
        }
    }

    pub fn failed_tasks(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.task.to_string()).collect()
    }

    pub fn result_for(&self, task: TaskId) -> Option<&StageResult> {
        self.results.iter().find(|r| r.task == task)
    }

    /// Converts an unsuccessful report into `PipelineError::StageFailure`.
    pub fn into_result(self) -> Result<RunReport, PipelineError> {
        if self.success {
            Ok(self)
        } else {
            Err(PipelineError::StageFailure { stages: self.failed_tasks() })
        }
    }
}


/// Input of a chained stage; a producer stdout that cannot be handed over is a
/// launch failure of the consumer.
fn stage_input(task: TaskId, converted: io::Result<Stdio>) -> Result<Stdio, PipelineError> {
    converted.map_err(|e| PipelineError::Launch {
        stage: task.to_string(),
        error: format!("cannot attach upstream output: {}", e),
    })
}


/// Starts every task of an assembled run, waits for all of them, and tears the
/// workspace down.
///
/// No failure short-circuits the wait: a stage that fails to launch or exits early
/// just closes its ends, and its neighbours run on until they see end-of-stream.
///
/// # Arguments
///
/// * `run` - Output of the builder; consumed.
/// * `log` - Command log; each argv is recorded before it is spawned.
///
/// # Returns
/// Result<RunReport, PipelineError>. `Err` only if the sink FIFOs cannot be opened,
/// in which case nothing was spawned.
pub async fn run(run: PipelineRun, log: &mut CommandLog) -> Result<RunReport, PipelineError> {
    let bypassed = run.bypassed();
    let PipelineRun { workspace, slots, sink: sink_plan, timeout } = run;
    let workspace_path = workspace.path().to_path_buf();

    let (attached, mut holds) = sink::attach(&sink_plan)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let sink_tasks = attached.start(&sink_plan, &workspace, log, &cancel_rx);
    let mut handles: Vec<(TaskId, JoinHandle<StageResult>)> = sink_tasks.handles;
    let mut results: Vec<StageResult> = sink_tasks.not_started;

    let mut upstream: Option<ChildStdout> = None;
    for slot in &slots {
        let stage = match slot {
            StageSlot::Active(stage) => stage,
            StageSlot::Bypassed(_) => continue,
        };
        let task = TaskId::Stage(stage.spec.name);

        let stage_holds: Vec<FifoHold> = stage.fifo_outputs.iter().filter_map(|id| holds.remove(id)).collect();
        let stdin = match (stage.input.as_ref(), upstream.take()) {
            (Some(_), Some(stdout)) => match stage_input(task, pipe_to_stdio(stdout)) {
                Ok(stdin) => stdin,
                Err(e) => {
                    error!("{}", e);
                    drop(stage_holds);
                    results.push(StageResult::launch_error(task, &e));
                    continue;
                }
            },
            _ => Stdio::null(),
        };
        let stdout = if stage.output.is_some() { Stdio::piped() } else { Stdio::null() };

        log.record(&stage.argv, None);
        match runner::start(task, &stage.argv, stdin, stdout) {
            Ok(mut running) => {
                if stage.output.is_some() {
                    upstream = running.take_stdout();
                }
                for hold in stage_holds {
                    running.hold(hold);
                }
                handles.push((task, tokio::spawn(running.join(cancel_rx.clone()))));
            }
            Err(e) => {
                error!("{}", e);
                drop(stage_holds);
                results.push(StageResult::launch_error(task, &e));
            }
        }
    }
    drop(upstream);
    for (id, _) in holds.drain() {
        debug!("No producer claimed {}; releasing", id);
    }
    drop(cancel_rx);

    let timer = timeout.map(|limit| {
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Run exceeded {} seconds; killing remaining processes", limit.as_secs());
            let _ = cancel_tx.send(true);
        })
    });

    info!("Waiting on {} tasks", handles.len());
    let (tasks, joins): (Vec<TaskId>, Vec<JoinHandle<StageResult>>) = handles.into_iter().unzip();
    for (task, joined) in tasks.into_iter().zip(join_all(joins).await) {
        results.push(joined.unwrap_or_else(|e| {
            StageResult::not_started(task, StageStatus::Errored(format!("task did not complete: {}", e)))
        }));
    }
    if let Some(timer) = timer {
        timer.abort();
    }

    results.sort_by_key(|r| r.task);
    let mut report = RunReport::from_results(results, bypassed, workspace_path);

    if let Err(e) = workspace.close() {
        error!("{}", e);
        report.resource_errors.push(e.to_string());
    }

    Ok(report)
}
