use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use thiserror::Error;

use crate::cli::{Arguments, QualityEncoding};
use crate::utils::file::prefix_stem;
use crate::utils::system::get_ram_temp_dir;

// External software
pub const PAIRS_TAG: &str = "pairs";
pub const SEQQS_TAG: &str = "seqqs";
pub const SCYTHE_TAG: &str = "scythe";
pub const SICKLE_TAG: &str = "sickle";
pub const GZIP_TAG: &str = "gzip";

// Static Filenames
pub const READ1_FIFO: &str = "read1.fifo";
pub const READ2_FIFO: &str = "read2.fifo";
pub const ORPHANS_FIFO: &str = "orphans.fifo";
pub const SINGLETONS_FIFO: &str = "singletons.fifo";
pub const WORKSPACE_PREFIX: &str = "knives_";

// Static Parameters
pub const DEFAULT_MIN_QUALITY: u8 = 20;
pub const DEFAULT_MIN_LENGTH: usize = 40;
pub const RUN_STAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to launch {stage}: {error}")]
    Launch { stage: String, error: String },

    #[error("Pipeline failed in stage(s): {}", .stages.join(", "))]
    StageFailure { stages: Vec<String> },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}


/// The seven stages of the fixed QC chain, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageName {
    Interleave,
    InitialQc,
    AdaptorStrip,
    NoadaptQc,
    QualityTrim,
    QualtrimQc,
    Deinterleave,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::Interleave,
        StageName::InitialQc,
        StageName::AdaptorStrip,
        StageName::NoadaptQc,
        StageName::QualityTrim,
        StageName::QualtrimQc,
        StageName::Deinterleave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Interleave => "interleave",
            StageName::InitialQc => "initial_qc",
            StageName::AdaptorStrip => "adaptor_strip",
            StageName::NoadaptQc => "noadapt_qc",
            StageName::QualityTrim => "quality_trim",
            StageName::QualtrimQc => "qualtrim_qc",
            StageName::Deinterleave => "deinterleave",
        }
    }

    pub fn from_name(name: &str) -> Option<StageName> {
        StageName::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkName {
    Read1,
    Read2,
    Unpaired,
}

/// Anything the supervisor joins and reports on. Ordered as reported: stages in
/// pipeline order, then sinks, then the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskId {
    Stage(StageName),
    Sink(SinkName),
    UnpairedMerge,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Stage(stage) => write!(f, "{}", stage),
            TaskId::Sink(SinkName::Read1) => f.write_str("read1_sink"),
            TaskId::Sink(SinkName::Read2) => f.write_str("read2_sink"),
            TaskId::Sink(SinkName::Unpaired) => f.write_str("unpaired_sink"),
            TaskId::UnpairedMerge => f.write_str("unpaired_merge"),
        }
    }
}


/// Executables for every external tool. Defaults are bare names resolved on PATH at spawn.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub pairs: PathBuf,
    pub seqqs: PathBuf,
    pub scythe: PathBuf,
    pub sickle: PathBuf,
    pub compressor: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths {
            pairs: PathBuf::from(PAIRS_TAG),
            seqqs: PathBuf::from(SEQQS_TAG),
            scythe: PathBuf::from(SCYTHE_TAG),
            sickle: PathBuf::from(SICKLE_TAG),
            compressor: PathBuf::from(GZIP_TAG),
        }
    }
}


/// Immutable per-run configuration, shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub cwd: PathBuf,
    pub ram_temp_dir: PathBuf,
    pub tools: ToolPaths,
    pub file1: PathBuf,
    pub file2: PathBuf,
    pub adaptors: PathBuf,
    pub out1: PathBuf,
    pub out2: PathBuf,
    pub unpaired: PathBuf,
    pub prefix: String,
    pub prior: f64,
    pub encoding: QualityEncoding,
    pub min_quality: u8,
    pub min_length: usize,
    pub discard_n: bool,
    pub skip: Vec<String>,
    pub log_dir: PathBuf,
    pub log_stderr: bool,
    pub timeout: Option<Duration>,
    pub run_stamp: String,
}

impl RunConfig {
    /// Validates parsed arguments into a run configuration.
    ///
    /// Nothing is created on disk here; every failure is a `Configuration` error.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments.
    /// * `cwd` - Directory relative paths are resolved against.
    ///
    /// # Returns
    /// Result<RunConfig, PipelineError>
    pub fn from_args(args: &Arguments, cwd: &Path) -> Result<RunConfig, PipelineError> {
        if !(args.prior > 0.0 && args.prior < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "Prior probability must lie strictly between 0 and 1, got {}",
                args.prior
            )));
        }
        if args.prefix.trim().is_empty() {
            return Err(PipelineError::Configuration("Output prefix must not be empty".to_string()));
        }
        if args.timeout == Some(0) {
            return Err(PipelineError::Configuration("Timeout must be at least one second".to_string()));
        }

        let resolve = |p: &str| -> PathBuf {
            let path = PathBuf::from(p);
            if path.is_absolute() { path } else { cwd.join(path) }
        };

        let defaults = ToolPaths::default();
        let tools = ToolPaths {
            pairs: args.pairs.as_deref().map(PathBuf::from).unwrap_or(defaults.pairs),
            seqqs: args.seqqs.as_deref().map(PathBuf::from).unwrap_or(defaults.seqqs),
            scythe: args.scythe.as_deref().map(PathBuf::from).unwrap_or(defaults.scythe),
            sickle: args.sickle.as_deref().map(PathBuf::from).unwrap_or(defaults.sickle),
            compressor: args.compressor.as_deref().map(PathBuf::from).unwrap_or(defaults.compressor),
        };

        let skip = args
            .skip
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(RunConfig {
            cwd: cwd.to_path_buf(),
            ram_temp_dir: args
                .temp_dir
                .as_deref()
                .map(resolve)
                .unwrap_or_else(get_ram_temp_dir),
            tools,
            file1: resolve(&args.file1),
            file2: resolve(&args.file2),
            adaptors: resolve(&args.adaptors),
            out1: resolve(&args.out1),
            out2: resolve(&args.out2),
            unpaired: resolve(&args.unpaired),
            prefix: resolve(args.prefix.trim()).to_string_lossy().into_owned(),
            prior: args.prior,
            encoding: args.encoding.clone(),
            min_quality: args.quality,
            min_length: args.min_length,
            discard_n: args.discard_n,
            skip,
            log_dir: resolve(&args.log_dir),
            log_stderr: !args.no_stderr_log,
            timeout: args.timeout.map(Duration::from_secs),
            run_stamp: Local::now().format(RUN_STAMP_FORMAT).to_string(),
        })
    }

    /// Path prefix handed to the report generator for one QC checkpoint.
    pub fn report_prefix(&self, checkpoint: &str) -> String {
        format!("{}_{}_{}", self.prefix, checkpoint, self.run_stamp)
    }

    /// Path of a run log (`cmds`, `stderrs`, `summary`) inside the log directory.
    pub fn log_path(&self, kind: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}_{}.log", prefix_stem(&self.prefix), kind, self.run_stamp))
    }
}
