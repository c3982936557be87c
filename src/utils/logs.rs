// src/utils/logs.rs: Per-run log files (commands, captured stderr)

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, warn};

use crate::config::defs::{PipelineError, LOG_TIME_FORMAT};
use crate::utils::runner::StageResult;

/// Append-only record of every command line, written before the command runs.
#[derive(Debug)]
pub struct CommandLog {
    path: PathBuf,
    file: Option<File>,
}

impl CommandLog {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Resource(format!("Failed to create log directory {}: {}", parent.display(), e)))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::Resource(format!("Failed to open command log {}: {}", path.display(), e)))?;
        Ok(CommandLog { path: path.to_path_buf(), file: Some(file) })
    }

    /// A log that only echoes to the debug logger.
    pub fn detached() -> Self {
        CommandLog { path: PathBuf::new(), file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one line for `argv`, with ` > dest` when stdout goes to a file.
    pub fn record(&mut self, argv: &[String], stdout_to: Option<&Path>) {
        let mut line = argv.join(" ");
        if let Some(dest) = stdout_to {
            line.push_str(&format!(" > {}", dest.display()));
        }
        debug!("Running: {}", line);
        if let Some(file) = self.file.as_mut() {
            let written = writeln!(file, "{:>20}: {}", Local::now().format(LOG_TIME_FORMAT), line)
                .and_then(|_| file.flush());
            if let Err(e) = written {
                warn!("Failed to write command log {}: {}", self.path.display(), e);
            }
        }
    }
}


/// Writes every stage's captured stderr, line by line, tagged with the stage name.
/// Lines from failing stages are logged at ERROR, the rest at INFO.
///
/// # Arguments
///
/// * `path` - Destination log file (truncated).
/// * `results` - Stage results in pipeline order.
///
/// # Returns
/// io::Result<()>
pub fn write_diagnostics(path: &Path, results: &[StageResult]) -> io::Result<()> {
    let mut file = File::create(path)?;
    for result in results {
        let level = if result.is_success() { "INFO" } else { "ERROR" };
        let stamp = result.finished_at.format(LOG_TIME_FORMAT);
        let text = String::from_utf8_lossy(&result.stderr);
        for line in text.lines() {
            writeln!(file, "{:>20} - {:>8}: [{}] {}", stamp, level, result.task, line)?;
        }
        if !result.is_success() {
            writeln!(file, "{:>20} - {:>8}: [{}] {}", stamp, level, result.task, result.status)?;
        }
    }
    file.flush()
}
