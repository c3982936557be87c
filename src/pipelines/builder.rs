use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use log::{debug, info};

use crate::config::defs::{
    PipelineError, RunConfig, StageName, ToolPaths, ORPHANS_FIFO, READ1_FIFO, READ2_FIFO, SINGLETONS_FIFO,
};
use crate::pipelines::sink::{SinkPlan, SinkRoute};
use crate::utils::command::{compressor, generate_cli, stage_template, ArgToken, FifoPaths};
use crate::utils::junction::{Junction, Workspace};

lazy_static! {
    /// Tool names accepted in the skip list, mapped to the stages they run.
    static ref SKIP_ALIASES: HashMap<&'static str, &'static [StageName]> = {
        let mut m: HashMap<&'static str, &'static [StageName]> = HashMap::new();
        m.insert("scythe", &[StageName::AdaptorStrip]);
        m.insert("sickle", &[StageName::QualityTrim]);
        m.insert("seqqs", &[StageName::InitialQc, StageName::NoadaptQc, StageName::QualtrimQc]);
        m
    };
}

/// Static description of one stage of the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub name: StageName,
    pub executable: PathBuf,
    pub template: Vec<ArgToken>,
    pub skippable: bool,
}

impl StageSpec {
    /// Named FIFOs this stage writes to besides its stdout.
    pub fn fifo_outputs(&self) -> Vec<&'static str> {
        self.template
            .iter()
            .filter_map(|token| match token {
                ArgToken::Fifo(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// The fixed QC chain, in order.
pub fn default_stages(tools: &ToolPaths) -> Vec<StageSpec> {
    StageName::ALL
        .iter()
        .map(|&name| {
            let executable = match name {
                StageName::Interleave | StageName::Deinterleave => tools.pairs.clone(),
                StageName::InitialQc | StageName::NoadaptQc | StageName::QualtrimQc => tools.seqqs.clone(),
                StageName::AdaptorStrip => tools.scythe.clone(),
                StageName::QualityTrim => tools.sickle.clone(),
            };
            StageSpec {
                name,
                executable,
                template: stage_template(name),
                skippable: !matches!(name, StageName::Interleave | StageName::Deinterleave),
            }
        })
        .collect()
}


/// Stages to bypass, resolved once at build time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipSet(BTreeSet<StageName>);

impl SkipSet {
    /// Maps user-facing skip names (stage names or tool aliases) onto stages.
    ///
    /// # Arguments
    ///
    /// * `names` - Requested skips.
    /// * `stages` - The stage list being built.
    ///
    /// # Returns
    /// Result<SkipSet, PipelineError>, `Configuration` for unknown or non-skippable names.
    pub fn resolve(names: &[String], stages: &[StageSpec]) -> Result<SkipSet, PipelineError> {
        let mut set = BTreeSet::new();
        for raw in names {
            let name = raw.trim().to_lowercase();
            let targets: Vec<StageName> = match (SKIP_ALIASES.get(name.as_str()), StageName::from_name(&name)) {
                (Some(aliased), _) => aliased.to_vec(),
                (None, Some(stage)) => vec![stage],
                (None, None) => {
                    return Err(PipelineError::Configuration(format!(
                        "Unknown stage '{}' in skip list; expected one of scythe, sickle, seqqs or a stage name",
                        raw
                    )));
                }
            };
            for target in targets {
                match stages.iter().find(|s| s.name == target) {
                    Some(spec) if spec.skippable => {
                        set.insert(target);
                    }
                    Some(_) => {
                        return Err(PipelineError::Configuration(format!("Stage '{}' cannot be skipped", target)));
                    }
                    None => {
                        return Err(PipelineError::Configuration(format!(
                            "Stage '{}' is not part of this pipeline",
                            target
                        )));
                    }
                }
            }
        }
        Ok(SkipSet(set))
    }

    pub fn contains(&self, stage: StageName) -> bool {
        self.0.contains(&stage)
    }
}


/// A stage with its concrete argv and wiring.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub spec: StageSpec,
    pub argv: Vec<String>,
    /// `None` for the head of the chain, which reads its inputs by path.
    pub input: Option<Junction>,
    /// `None` for the tail, which writes only to named FIFOs.
    pub output: Option<Junction>,
    pub fifo_outputs: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum StageSlot {
    Active(PlannedStage),
    Bypassed(StageName),
}

/// An assembled, not yet started run. Owns the workspace.
#[derive(Debug)]
pub struct PipelineRun {
    pub workspace: Workspace,
    pub slots: Vec<StageSlot>,
    pub sink: SinkPlan,
    pub timeout: Option<Duration>,
}

impl PipelineRun {
    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn active_stages(&self) -> impl Iterator<Item = &PlannedStage> {
        self.slots.iter().filter_map(|slot| match slot {
            StageSlot::Active(stage) => Some(stage),
            StageSlot::Bypassed(_) => None,
        })
    }

    pub fn bypassed(&self) -> Vec<StageName> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                StageSlot::Bypassed(name) => Some(*name),
                StageSlot::Active(_) => None,
            })
            .collect()
    }
}


fn check_topology(stages: &[StageSpec]) -> Result<(), PipelineError> {
    match (stages.first().map(|s| s.name), stages.last().map(|s| s.name)) {
        (Some(StageName::Interleave), Some(StageName::Deinterleave)) => Ok(()),
        _ => Err(PipelineError::Configuration(
            "Stage list must start with interleave and end with deinterleave".to_string(),
        )),
    }
}

/// Assembles the run graph for the default stage table.
pub fn build_default(config: &RunConfig) -> Result<PipelineRun, PipelineError> {
    build(default_stages(&config.tools), &config.skip, config)
}

/// Resolves skips, allocates the workspace and junctions, and instantiates every argv.
///
/// All configuration errors are raised before the workspace exists.
///
/// # Arguments
///
/// * `stages` - Ordered stage descriptors.
/// * `skip` - Names of stages to bypass.
/// * `config` - Run configuration.
///
/// # Returns
/// Result<PipelineRun, PipelineError>
pub fn build(stages: Vec<StageSpec>, skip: &[String], config: &RunConfig) -> Result<PipelineRun, PipelineError> {
    check_topology(&stages)?;
    let skip_set = SkipSet::resolve(skip, &stages)?;

    let active: Vec<StageSpec> = stages.iter().filter(|s| !skip_set.contains(s.name)).cloned().collect();
    let trimming = active.iter().any(|s| s.name == StageName::QualityTrim);

    let workspace = Workspace::create(&config.ram_temp_dir)?;

    let read1 = workspace.fifo(READ1_FIFO)?;
    let read2 = workspace.fifo(READ2_FIFO)?;
    let orphans = workspace.fifo(ORPHANS_FIFO)?;
    let singletons = if trimming { Some(workspace.fifo(SINGLETONS_FIFO)?) } else { None };

    let mut fifos = FifoPaths::new();
    for junction in [Some(&read1), Some(&read2), Some(&orphans), singletons.as_ref()].into_iter().flatten() {
        if let Some(path) = junction.fifo_path() {
            fifos.insert(junction.id, path.to_path_buf());
        }
    }

    let mut planned: HashMap<StageName, PlannedStage> = HashMap::new();
    for (i, spec) in active.iter().enumerate() {
        let argv = generate_cli(&spec.executable, &spec.template, config, &fifos)?;
        let input = if i == 0 { None } else { Some(Junction::pipe(active[i - 1].name.as_str())) };
        let output = if i + 1 == active.len() { None } else { Some(Junction::pipe(spec.name.as_str())) };
        debug!("Planned {}: {}", spec.name, argv.join(" "));
        planned.insert(
            spec.name,
            PlannedStage { fifo_outputs: spec.fifo_outputs(), spec: spec.clone(), argv, input, output },
        );
    }

    let slots: Vec<StageSlot> = stages
        .iter()
        .map(|spec| match planned.remove(&spec.name) {
            Some(stage) => StageSlot::Active(stage),
            None => {
                info!("Skipping {}", spec.name);
                StageSlot::Bypassed(spec.name)
            }
        })
        .collect();

    let sink = SinkPlan {
        compressor: generate_cli(&config.tools.compressor, &compressor::template(), config, &fifos)?,
        read1: SinkRoute { junction: read1, dest: config.out1.clone() },
        read2: SinkRoute { junction: read2, dest: config.out2.clone() },
        orphans,
        singletons,
        unpaired_dest: config.unpaired.clone(),
    };

    Ok(PipelineRun { workspace, slots, sink, timeout: config.timeout })
}
