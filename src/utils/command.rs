/// Argument templates for the external tools and their instantiation into argv.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use crate::config::defs::{PipelineError, RunConfig, StageName};

/// One argv slot: either literal text or a value taken from the run configuration
/// or the junction wiring when the template is instantiated.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgToken {
    Lit(&'static str),
    Encoding,
    SickleEncoding,
    MinQuality,
    MinLength,
    Prior,
    Adaptors,
    /// Expands to `-n` only when the Ns filter is on.
    DiscardN,
    ReportPrefix(&'static str),
    Input1,
    Input2,
    Fifo(&'static str),
}

/// FIFO paths allocated by the builder, keyed by junction id.
pub type FifoPaths = HashMap<&'static str, PathBuf>;

pub mod pairs {
    use super::ArgToken::{self, *};
    use crate::config::defs::{ORPHANS_FIFO, READ1_FIFO, READ2_FIFO};

    pub fn join_template() -> Vec<ArgToken> {
        vec![
            Lit("join"),
            Lit("-t"), // write /1 /2 tags to headers
            Input1,
            Input2,
        ]
    }

    pub fn split_template() -> Vec<ArgToken> {
        vec![
            Lit("split"),
            Lit("-1"),
            Fifo(READ1_FIFO),
            Lit("-2"),
            Fifo(READ2_FIFO),
            Lit("-u"),
            Fifo(ORPHANS_FIFO),
            Lit("-"),
        ]
    }
}

pub mod seqqs {
    use super::ArgToken::{self, *};

    pub fn template(checkpoint: &'static str) -> Vec<ArgToken> {
        vec![
            Lit("-i"), // interleaved input
            Lit("-e"), // stream input back out on stdout
            Lit("-q"),
            Encoding,
            Lit("-p"),
            ReportPrefix(checkpoint),
            Lit("-"),
        ]
    }
}

pub mod scythe {
    use super::ArgToken::{self, *};

    pub fn template() -> Vec<ArgToken> {
        vec![
            Lit("-p"),
            Prior,
            Lit("-a"),
            Adaptors,
            Lit("-q"),
            Encoding,
            Lit("-M"),
            Lit("0"), // length filtering is left to sickle so pairs stay in step
            Lit("-"),
        ]
    }
}

pub mod sickle {
    use super::ArgToken::{self, *};
    use crate::config::defs::SINGLETONS_FIFO;

    pub fn template() -> Vec<ArgToken> {
        vec![
            Lit("pe"),
            Lit("-t"),
            SickleEncoding,
            Lit("-c"),
            Lit("/dev/stdin"),
            Lit("-m"),
            Lit("/dev/stdout"),
            Lit("-s"),
            Fifo(SINGLETONS_FIFO),
            Lit("-q"),
            MinQuality,
            Lit("-l"),
            MinLength,
            DiscardN,
        ]
    }
}

pub mod compressor {
    use super::ArgToken::{self, *};

    pub fn template() -> Vec<ArgToken> {
        vec![Lit("-c")]
    }
}

/// Argument template of a pipeline stage.
pub fn stage_template(stage: StageName) -> Vec<ArgToken> {
    match stage {
        StageName::Interleave => pairs::join_template(),
        StageName::InitialQc => seqqs::template("initial"),
        StageName::AdaptorStrip => scythe::template(),
        StageName::NoadaptQc => seqqs::template("noadapt"),
        StageName::QualityTrim => sickle::template(),
        StageName::QualtrimQc => seqqs::template("qualtrim"),
        StageName::Deinterleave => pairs::split_template(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Substitutes configuration values into a template, producing a full argv
/// with the executable first.
///
/// # Arguments
///
/// * `executable` - Program to run.
/// * `template` - Argument template of the tool.
/// * `config` - Run configuration the values come from.
/// * `fifos` - Named FIFOs allocated for this run.
///
/// # Returns
/// Result<Vec<String>, PipelineError>
pub fn generate_cli(
    executable: &Path,
    template: &[ArgToken],
    config: &RunConfig,
    fifos: &FifoPaths,
) -> Result<Vec<String>, PipelineError> {
    let mut args_vec: Vec<String> = Vec::with_capacity(template.len() + 1);
    args_vec.push(path_arg(executable));

    for token in template {
        match token {
            ArgToken::Lit(text) => args_vec.push(text.to_string()),
            ArgToken::Encoding => args_vec.push(config.encoding.as_str().to_string()),
            ArgToken::SickleEncoding => args_vec.push(config.encoding.sickle_name().to_string()),
            ArgToken::MinQuality => args_vec.push(config.min_quality.to_string()),
            ArgToken::MinLength => args_vec.push(config.min_length.to_string()),
            ArgToken::Prior => args_vec.push(config.prior.to_string()),
            ArgToken::Adaptors => args_vec.push(path_arg(&config.adaptors)),
            ArgToken::DiscardN => {
                if config.discard_n {
                    args_vec.push("-n".to_string());
                }
            }
            ArgToken::ReportPrefix(checkpoint) => args_vec.push(config.report_prefix(checkpoint)),
            ArgToken::Input1 => args_vec.push(path_arg(&config.file1)),
            ArgToken::Input2 => args_vec.push(path_arg(&config.file2)),
            ArgToken::Fifo(id) => {
                let path = fifos
                    .get(id)
                    .ok_or_else(|| PipelineError::Other(anyhow!("No junction allocated for {}", id)))?;
                args_vec.push(path_arg(path));
            }
        }
    }

    Ok(args_vec)
}
