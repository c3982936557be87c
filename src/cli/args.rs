use clap::{Parser, ValueEnum};

use crate::config::defs::{DEFAULT_MIN_LENGTH, DEFAULT_MIN_QUALITY};

/// Quality score encoding of the input reads.
#[derive(Debug, Clone, ValueEnum, Default, PartialEq)]
pub enum QualityEncoding {
    Phred,
    #[default]
    Sanger,
    Solexa,
    Illumina,
}

impl QualityEncoding {
    /// Name understood by scythe and seqqs.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityEncoding::Phred => "phred",
            QualityEncoding::Sanger => "sanger",
            QualityEncoding::Solexa => "solexa",
            QualityEncoding::Illumina => "illumina",
        }
    }

    /// sickle has no `phred` keyword; phred+33 is its `sanger`.
    pub fn sickle_name(&self) -> &'static str {
        match self {
            QualityEncoding::Phred | QualityEncoding::Sanger => "sanger",
            QualityEncoding::Solexa => "solexa",
            QualityEncoding::Illumina => "illumina",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "knives", version, about = "Adaptor and quality trimming of paired reads through an external tool chain")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "file1", help = "Input R1 file")]
    pub file1: String,

    #[arg(short = 'I', long = "file2", help = "Input R2 file")]
    pub file2: String,

    #[arg(short = 'o', long = "out1", help = "Output R1 file (gzip compressed)")]
    pub out1: String,

    #[arg(short = 'O', long = "out2", help = "Output R2 file (gzip compressed)")]
    pub out2: String,

    #[arg(short = 'u', long = "unpaired", help = "Unpaired output file (gzip compressed)")]
    pub unpaired: String,

    #[arg(short = 'a', long = "adaptors", help = "FASTA file of adaptor sequences, for scythe")]
    pub adaptors: String,

    #[arg(short = 'p', long = "prefix", help = "Prefix of seqqs reports and log files")]
    pub prefix: String,

    #[arg(short = 'r', long = "prior", allow_negative_numbers = true, help = "Prior probability of adaptor contamination, strictly between 0 and 1")]
    pub prior: f64,

    #[arg(short = 't', long = "encoding", default_value = "sanger", value_enum)]
    pub encoding: QualityEncoding,

    #[arg(short = 'q', long = "quality", default_value_t = DEFAULT_MIN_QUALITY, help = "Minimum window quality for sickle")]
    pub quality: u8,

    #[arg(short = 'l', long = "min-length", default_value_t = DEFAULT_MIN_LENGTH, help = "Minimum read length remaining after trimming")]
    pub min_length: usize,

    #[arg(
        short = 's',
        long = "skip",
        value_delimiter = ',',
        help = "Comma-separated stages to skip: scythe, sickle, seqqs or any skippable stage name"
    )]
    pub skip: Vec<String>,

    #[arg(short = 'n', long = "discard-n", action, help = "Remove any read containing Ns")]
    pub discard_n: bool,

    #[arg(short = 'L', long = "log-dir", default_value = ".")]
    pub log_dir: String,

    #[arg(short = 'S', long = "no-stderr-log", action, help = "Don't write the stderr of each program to a log")]
    pub no_stderr_log: bool,

    #[arg(short = 'K', long = "sickle")]
    pub sickle: Option<String>,

    #[arg(short = 'C', long = "scythe")]
    pub scythe: Option<String>,

    #[arg(short = 'E', long = "seqqs")]
    pub seqqs: Option<String>,

    #[arg(short = 'P', long = "pairs")]
    pub pairs: Option<String>,

    #[arg(long, help = "Compressor for the final outputs; must accept -c and stream stdin to stdout")]
    pub compressor: Option<String>,

    #[arg(long, help = "Parent directory of the run workspace; defaults to /dev/shm when available")]
    pub temp_dir: Option<String>,

    #[arg(long, help = "Kill every stage if the run exceeds this many seconds")]
    pub timeout: Option<u64>,
}
