//! Fan-out tail of the pipeline: three compressed sinks, with orphans and
//! singletons merged into the unpaired one.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::process::Stdio;

use chrono::Local;
use log::{debug, error};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::defs::{PipelineError, SinkName, TaskId};
use crate::utils::file::create_output_file;
use crate::utils::junction::{open_fifo, FifoHold, Junction, Workspace};
use crate::utils::logs::CommandLog;
use crate::utils::runner::{self, StageResult, StageStatus};

#[derive(Debug, Clone)]
pub struct SinkRoute {
    pub junction: Junction,
    pub dest: PathBuf,
}

/// Wiring of the fan-out tail, produced by the builder.
#[derive(Debug, Clone)]
pub struct SinkPlan {
    /// Compressor argv; reads stdin, writes stdout.
    pub compressor: Vec<String>,
    pub read1: SinkRoute,
    pub read2: SinkRoute,
    /// Reads the deinterleaver could not pair.
    pub orphans: Junction,
    /// Trimmer singletons; absent when trimming is bypassed.
    pub singletons: Option<Junction>,
    pub unpaired_dest: PathBuf,
}

/// Read ends of every tail FIFO, opened before any producer starts.
#[derive(Debug)]
pub struct AttachedSink {
    read1: File,
    read2: File,
    orphans: File,
    singletons: Option<File>,
}

/// Spawned sink tasks plus results for sinks that never started.
pub struct SinkTasks {
    pub handles: Vec<(TaskId, JoinHandle<StageResult>)>,
    pub not_started: Vec<StageResult>,
}

/// Opens the consumer side of every tail FIFO.
///
/// # Arguments
///
/// * `plan` - Sink wiring from the builder.
///
/// # Returns
/// The attached sink and, keyed by junction id, the holds the producers must own.
pub fn attach(plan: &SinkPlan) -> Result<(AttachedSink, HashMap<&'static str, FifoHold>), PipelineError> {
    let mut holds = HashMap::new();
    let mut open = |junction: &Junction| -> Result<File, PipelineError> {
        let (reader, hold) = open_fifo(junction)?;
        holds.insert(junction.id, hold);
        Ok(reader)
    };

    let read1 = open(&plan.read1.junction)?;
    let read2 = open(&plan.read2.junction)?;
    let orphans = open(&plan.orphans)?;
    let singletons = plan.singletons.as_ref().map(&mut open).transpose()?;

    Ok((AttachedSink { read1, read2, orphans, singletons }, holds))
}

impl AttachedSink {
    /// Starts the three compressors and the unpaired merge.
    pub fn start(
        self,
        plan: &SinkPlan,
        workspace: &Workspace,
        log: &mut CommandLog,
        cancel: &watch::Receiver<bool>,
    ) -> SinkTasks {
        let mut tasks = SinkTasks { handles: Vec::new(), not_started: Vec::new() };

        for (name, reader, route) in [
            (SinkName::Read1, self.read1, &plan.read1),
            (SinkName::Read2, self.read2, &plan.read2),
        ] {
            let task = TaskId::Sink(name);
            let spare = reader.try_clone();
            match start_compressor(task, &plan.compressor, Stdio::from(reader), route, log) {
                Ok(running) => tasks.handles.push((task, tokio::spawn(running.join(cancel.clone())))),
                Err(e) => {
                    error!("{}", e);
                    tasks.not_started.push(StageResult::launch_error(task, &e));
                    match spare {
                        Ok(spare) => discard(spare, task),
                        Err(e) => error!("Cannot drain {} input: {}", task, e),
                    }
                }
            }
        }

        let unpaired_task = TaskId::Sink(SinkName::Unpaired);
        let unpaired_route = SinkRoute { junction: plan.orphans.clone(), dest: plan.unpaired_dest.clone() };
        let compressor = start_compressor(unpaired_task, &plan.compressor, Stdio::piped(), &unpaired_route, log)
            .and_then(|mut running| {
                let stdin = running.take_stdin().ok_or_else(|| PipelineError::Launch {
                    stage: unpaired_task.to_string(),
                    error: "compressor stdin was not captured".to_string(),
                })?;
                Ok((running, stdin))
            });
        let spool = workspace
            .spool()
            .map_err(|e| PipelineError::Resource(format!("Failed to create singleton spool: {}", e)));

        match (compressor, spool) {
            (Ok((running, stdin)), Ok(spool)) => {
                tasks.handles.push((unpaired_task, tokio::spawn(running.join(cancel.clone()))));
                let (orphans, singletons) = (self.orphans, self.singletons);
                tasks.handles.push((
                    TaskId::UnpairedMerge,
                    tokio::spawn(async move {
                        let started_at = Local::now();
                        let status = match merge_unpaired(orphans, singletons, spool, stdin).await {
                            Ok((orphan_bytes, singleton_bytes)) => {
                                debug!("Unpaired merge wrote {} orphan and {} singleton bytes", orphan_bytes, singleton_bytes);
                                StageStatus::Success
                            }
                            Err(e) => StageStatus::Errored(e.to_string()),
                        };
                        StageResult {
                            task: TaskId::UnpairedMerge,
                            status,
                            stderr: Vec::new(),
                            started_at,
                            finished_at: Local::now(),
                        }
                    }),
                ));
            }
            (Ok((running, stdin)), Err(e)) => {
                error!("Unpaired merge not started: {}", e);
                drop(stdin);
                tasks.handles.push((unpaired_task, tokio::spawn(running.join(cancel.clone()))));
                tasks.not_started.push(StageResult::not_started(TaskId::UnpairedMerge, StageStatus::Errored(e.to_string())));
                discard_unpaired(self.orphans, self.singletons);
            }
            (Err(e), _) => {
                error!("{}", e);
                tasks.not_started.push(StageResult::launch_error(unpaired_task, &e));
                tasks.not_started.push(StageResult::not_started(
                    TaskId::UnpairedMerge,
                    StageStatus::Errored(format!("no unpaired compressor: {}", e)),
                ));
                discard_unpaired(self.orphans, self.singletons);
            }
        }

        tasks
    }
}

/// Reads a FIFO to end-of-stream and throws the bytes away, so a producer whose
/// consumer never started is not blocked opening or writing it.
fn discard(reader: File, task: TaskId) {
    tokio::spawn(async move {
        let mut reader = tokio::fs::File::from_std(reader);
        match tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
            Ok(bytes) => debug!("Discarded {} bytes meant for {}", bytes, task),
            Err(e) => error!("Failed to drain input of {}: {}", task, e),
        }
    });
}

fn discard_unpaired(orphans: File, singletons: Option<File>) {
    discard(orphans, TaskId::UnpairedMerge);
    if let Some(singletons) = singletons {
        discard(singletons, TaskId::UnpairedMerge);
    }
}

fn start_compressor(
    task: TaskId,
    argv: &[String],
    stdin: Stdio,
    route: &SinkRoute,
    log: &mut CommandLog,
) -> Result<runner::RunningStage, PipelineError> {
    let out = create_output_file(&route.dest).map_err(|e| PipelineError::IOError(format!("{}: {}", task, e)))?;
    log.record(argv, Some(&route.dest));
    runner::start(task, argv, stdin, Stdio::from(out))
}

/// Writes every orphan byte, then every singleton byte, into `sink`.
///
/// Singletons are drained into `spool` while orphans stream, so the trimmer is never
/// blocked on a full FIFO waiting for orphans (which sit downstream of it) to finish.
///
/// # Arguments
///
/// * `orphans` - Read end of the deinterleaver's unpaired output.
/// * `singletons` - Read end of the trimmer's singleton output, if trimming ran.
/// * `spool` - Scratch file for singletons.
/// * `sink` - Stdin of the unpaired compressor; closed on return.
///
/// # Returns
/// io::Result<(u64, u64)> orphan and singleton byte counts.
pub async fn merge_unpaired(
    orphans: File,
    singletons: Option<File>,
    spool: File,
    mut sink: ChildStdin,
) -> io::Result<(u64, u64)> {
    let mut orphans = tokio::fs::File::from_std(orphans);
    let mut spool = tokio::fs::File::from_std(spool);

    let forward = tokio::io::copy(&mut orphans, &mut sink);
    let drain = async {
        match singletons {
            Some(singletons) => {
                let mut singletons = tokio::fs::File::from_std(singletons);
                let copied = tokio::io::copy(&mut singletons, &mut spool).await?;
                spool.flush().await?;
                Ok::<u64, io::Error>(copied)
            }
            None => Ok(0),
        }
    };
    let (orphan_bytes, singleton_bytes) = tokio::try_join!(forward, drain)?;

    spool.seek(SeekFrom::Start(0)).await?;
    let appended = tokio::io::copy(&mut spool, &mut sink).await?;
    debug_assert_eq!(appended, singleton_bytes);
    sink.shutdown().await?;
    drop(sink);

    Ok((orphan_bytes, singleton_bytes))
}
