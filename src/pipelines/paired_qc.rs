use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use log::{error, info, warn};

use crate::config::defs::{PipelineError, RunConfig, LOG_TIME_FORMAT};
use crate::pipelines::builder::build_default;
use crate::pipelines::supervisor::{self, RunReport};
use crate::utils::logs::{write_diagnostics, CommandLog};


/// Runs the paired-read QC chain end to end and writes the run logs.
///
/// # Arguments
///
/// * `config` - Validated run configuration.
///
/// # Returns
/// Result<RunReport, PipelineError>. A report with `success == false` is still `Ok`;
/// the caller decides the exit status.
pub async fn run(config: Arc<RunConfig>) -> Result<RunReport, PipelineError> {
    let run = build_default(&config)?;
    info!("Workspace: {}", run.workspace_path().display());
    for stage in run.bypassed() {
        info!("Bypassing {}", stage);
    }

    let mut log = CommandLog::create(&config.log_path("cmds"))?;
    info!("Command log: {}", log.path().display());

    let report = supervisor::run(run, &mut log).await?;

    if config.log_stderr {
        let path = config.log_path("stderrs");
        match write_diagnostics(&path, &report.results) {
            Ok(()) => info!("Stage diagnostics written to {}", path.display()),
            Err(e) => warn!("Failed to write diagnostics log {}: {}", path.display(), e),
        }
    }

    let summary = config.log_path("summary");
    if let Err(e) = write_summary(&summary, &report, &config) {
        warn!("Failed to write summary log {}: {}", summary.display(), e);
    }

    for failure in &report.failures {
        error!("{} failed: {}", failure.task, failure.detail);
        for line in failure.stderr.lines() {
            error!("  [{}] {}", failure.task, line);
        }
    }
    for resource_error in &report.resource_errors {
        warn!("{}", resource_error);
    }
    if report.success {
        info!("All {} tasks succeeded", report.results.len());
    }

    Ok(report)
}


/// Per-task status and wall time, plus the inputs and outputs of the run.
fn write_summary(path: &Path, report: &RunReport, config: &RunConfig) -> io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{:>20}: knives run {}", Local::now().format(LOG_TIME_FORMAT), config.run_stamp)?;
    writeln!(file, "inputs: {} {}", config.file1.display(), config.file2.display())?;
    writeln!(
        file,
        "outputs: {} {} {}",
        config.out1.display(),
        config.out2.display(),
        config.unpaired.display()
    )?;
    writeln!(
        file,
        "encoding: {}  min quality: {}  min length: {}  prior: {}  discard Ns: {}",
        config.encoding.as_str(),
        config.min_quality,
        config.min_length,
        config.prior,
        config.discard_n
    )?;
    if !report.bypassed.is_empty() {
        let names: Vec<&str> = report.bypassed.iter().map(|s| s.as_str()).collect();
        writeln!(file, "bypassed: {}", names.join(", "))?;
    }

    for result in &report.results {
        let elapsed = result.finished_at - result.started_at;
        writeln!(
            file,
            "{:<16} {:<24} {:>8.2}s",
            result.task.to_string(),
            result.status.to_string(),
            elapsed.num_milliseconds() as f64 / 1000.0
        )?;
    }
    for resource_error in &report.resource_errors {
        writeln!(file, "resource error: {}", resource_error)?;
    }
    if report.success {
        writeln!(file, "result: success")?;
    } else {
        writeln!(file, "result: FAILED ({})", report.failed_tasks().join(", "))?;
    }
    file.flush()
}
