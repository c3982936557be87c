use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use flate2::read::MultiGzDecoder;
use tempfile::TempDir;

use knives::cli::Arguments;
use knives::config::defs::{PipelineError, RunConfig, StageName, TaskId};
use knives::pipelines::paired_qc;
use knives::pipelines::supervisor::RunReport;

const RECORDS: usize = 4;

/// Knobs for the mock tool chain.
#[derive(Default)]
struct MockBehaviour {
    orphans: String,
    singletons: String,
    trimmer_fails: bool,
}

struct Fixture {
    dir: TempDir,
    args: Vec<String>,
}

fn write_tool(dir: &Path, name: &str, body: &str) -> Result<String> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path.to_string_lossy().into_owned())
}

/// Writes `text` to the file named by `$var`, or just opens it when empty.
fn emit(var: &str, text: &str) -> String {
    if text.is_empty() {
        format!(": > \"${}\"", var)
    } else {
        format!("cat > \"${}\" <<'KNIVES_EOF'\n{}KNIVES_EOF", var, text)
    }
}

fn fastq(mate: u8) -> String {
    (0..RECORDS)
        .map(|i| format!("@read{}/{}\nACGTACGT\n+\nIIIIIIII\n", i, mate))
        .collect()
}

impl Fixture {
    fn new(behaviour: MockBehaviour) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let base = dir.path();
        let bin = base.join("bin");
        let temp = base.join("tmp");
        fs::create_dir_all(&bin)?;
        fs::create_dir_all(&temp)?;

        fs::write(base.join("r1.fq"), fastq(1))?;
        fs::write(base.join("r2.fq"), fastq(2))?;
        fs::write(base.join("adaptors.fa"), ">a1\nAGATCGGAAGAGC\n")?;

        let pairs = write_tool(
            &bin,
            "pairs",
            &format!(
                r#"mode=$1; shift
case "$mode" in
join)
    [ "$1" = "-t" ] && shift
    awk 'NR==FNR {{ a[FNR]=$0; next }} {{ b[FNR]=$0 }} END {{ for (r = 0; r * 4 < FNR; r++) {{ for (i = 1; i <= 4; i++) print a[r*4+i]; for (i = 1; i <= 4; i++) print b[r*4+i] }} }}' "$1" "$2"
    ;;
split)
    while [ $# -gt 0 ]; do
        case "$1" in
            -1) o1=$2; shift 2 ;;
            -2) o2=$2; shift 2 ;;
            -u) ou=$2; shift 2 ;;
            *) shift ;;
        esac
    done
    awk -v o1="$o1" -v o2="$o2" '{{ if (int((NR - 1) / 4) % 2 == 0) print > o1; else print > o2 }}'
    {}
    ;;
*)
    echo "unknown mode $mode" >&2
    exit 1
    ;;
esac"#,
                emit("ou", &behaviour.orphans)
            ),
        )?;

        let seqqs = write_tool(
            &bin,
            "seqqs",
            r#"while [ $# -gt 0 ]; do
    case "$1" in
        -p) prefix=$2; shift 2 ;;
        *) shift ;;
    esac
done
echo "qc report" > "${prefix}_report.txt"
exec cat"#,
        )?;

        let scythe = write_tool(&bin, "scythe", "echo 'scythe: 0 adaptors matched' >&2\nexec cat")?;

        let sickle_body = if behaviour.trimmer_fails {
            "echo 'sickle: invalid minimum length' >&2\nexit 2".to_string()
        } else {
            format!(
                r#"while [ $# -gt 0 ]; do
    case "$1" in
        -s) single=$2; shift 2 ;;
        *) shift ;;
    esac
done
{}
exec cat"#,
                emit("single", &behaviour.singletons)
            )
        };
        let sickle = write_tool(&bin, "sickle", &sickle_body)?;

        let path_of = |name: &str| base.join(name).to_string_lossy().into_owned();
        let args = vec![
            "knives".to_string(),
            "-i".to_string(), path_of("r1.fq"),
            "-I".to_string(), path_of("r2.fq"),
            "-o".to_string(), path_of("out/clean_1.fq.gz"),
            "-O".to_string(), path_of("out/clean_2.fq.gz"),
            "-u".to_string(), path_of("out/unpaired.fq.gz"),
            "-a".to_string(), path_of("adaptors.fa"),
            "-p".to_string(), path_of("sample"),
            "-r".to_string(), "0.3".to_string(),
            "-L".to_string(), path_of("logs"),
            "-P".to_string(), pairs,
            "-E".to_string(), seqqs,
            "-C".to_string(), scythe,
            "-K".to_string(), sickle,
            "--temp-dir".to_string(), temp.to_string_lossy().into_owned(),
        ];

        Ok(Fixture { dir, args })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self, extra: &[&str]) -> Result<RunConfig> {
        let mut argv = self.args.clone();
        argv.extend(extra.iter().map(|s| s.to_string()));
        Ok(RunConfig::from_args(&Arguments::try_parse_from(argv)?, self.dir.path())?)
    }

    async fn run(&self, extra: &[&str]) -> Result<RunReport> {
        let config = Arc::new(self.config(extra)?);
        let report = tokio::time::timeout(Duration::from_secs(30), paired_qc::run(config)).await??;
        Ok(report)
    }

    fn decompressed(&self, name: &str) -> Result<String> {
        let mut text = String::new();
        MultiGzDecoder::new(fs::File::open(self.path(name))?).read_to_string(&mut text)?;
        Ok(text)
    }

    fn files_matching(&self, dir: &str, needle: &str) -> Result<Vec<String>> {
        let dir = self.path(dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(needle))
            .collect();
        names.sort();
        Ok(names)
    }
}

fn record_count(text: &str) -> usize {
    text.lines().count() / 4
}


#[tokio::test]
async fn test_end_to_end_all_stages() -> Result<()> {
    let fixture = Fixture::new(MockBehaviour::default())?;
    let report = fixture.run(&[]).await?;

    assert!(report.success, "failures: {:?}", report.failures);
    assert!(report.bypassed.is_empty());
    assert!(report.resource_errors.is_empty());
    assert!(!report.workspace.exists());

    let read1 = fixture.decompressed("out/clean_1.fq.gz")?;
    let read2 = fixture.decompressed("out/clean_2.fq.gz")?;
    let unpaired = fixture.decompressed("out/unpaired.fq.gz")?;
    assert_eq!(record_count(&read1), RECORDS);
    assert_eq!(record_count(&read2), RECORDS);
    assert!(unpaired.is_empty());
    assert_eq!(read1, fastq(1));
    assert_eq!(read2, fastq(2));

    let reports = fixture.files_matching(".", "_report.txt")?;
    assert_eq!(reports.len(), 3, "{:?}", reports);
    for checkpoint in ["_initial_", "_noadapt_", "_qualtrim_"] {
        assert!(reports.iter().any(|r| r.contains(checkpoint)), "missing {} in {:?}", checkpoint, reports);
    }

    let cmds = fixture.files_matching("logs", "_cmds_")?;
    assert_eq!(cmds.len(), 1);
    let cmd_lines = fs::read_to_string(fixture.path("logs").join(&cmds[0]))?;
    assert_eq!(cmd_lines.lines().count(), 7 + 3);
    assert!(cmd_lines.contains(" pe -t sanger -c /dev/stdin -m /dev/stdout -s "));

    let stderrs = fixture.files_matching("logs", "_stderrs_")?;
    let diagnostics = fs::read_to_string(fixture.path("logs").join(&stderrs[0]))?;
    assert!(diagnostics.contains("INFO: [adaptor_strip] scythe: 0 adaptors matched"));

    assert_eq!(fixture.files_matching("logs", "_summary_")?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unpaired_is_orphans_then_singletons() -> Result<()> {
    let orphans = "@orphan1/1\nGGGG\n+\nIIII\n@orphan2/2\nCCCC\n+\nIIII\n";
    let singletons = "@single1/1\nTTTT\n+\nIIII\n";
    let fixture = Fixture::new(MockBehaviour {
        orphans: orphans.to_string(),
        singletons: singletons.to_string(),
        ..Default::default()
    })?;
    let report = fixture.run(&[]).await?;
    assert!(report.success, "failures: {:?}", report.failures);

    let unpaired = fixture.decompressed("out/unpaired.fq.gz")?;
    assert_eq!(unpaired, format!("{}{}", orphans, singletons));
    assert_ne!(unpaired, format!("{}{}", singletons, orphans));

    let total = record_count(&fixture.decompressed("out/clean_1.fq.gz")?)
        + record_count(&fixture.decompressed("out/clean_2.fq.gz")?)
        + record_count(&unpaired);
    assert_eq!(total, 2 * RECORDS + 3);
    Ok(())
}

#[tokio::test]
async fn test_skipping_adaptor_strip_preserves_stream() -> Result<()> {
    let full = Fixture::new(MockBehaviour::default())?;
    let skipped = Fixture::new(MockBehaviour::default())?;

    let full_report = full.run(&[]).await?;
    let skipped_report = skipped.run(&["-s", "scythe"]).await?;
    assert!(full_report.success && skipped_report.success);
    assert_eq!(skipped_report.bypassed, vec![StageName::AdaptorStrip]);
    assert!(skipped_report.result_for(TaskId::Stage(StageName::AdaptorStrip)).is_none());

    for sink in ["out/clean_1.fq.gz", "out/clean_2.fq.gz", "out/unpaired.fq.gz"] {
        assert_eq!(full.decompressed(sink)?, skipped.decompressed(sink)?, "{} differs", sink);
    }

    let cmds = skipped.files_matching("logs", "_cmds_")?;
    let cmd_lines = fs::read_to_string(skipped.path("logs").join(&cmds[0]))?;
    assert_eq!(cmd_lines.lines().count(), 6 + 3);
    Ok(())
}

#[tokio::test]
async fn test_failing_trimmer_is_reported_and_workspace_removed() -> Result<()> {
    let fixture = Fixture::new(MockBehaviour { trimmer_fails: true, ..Default::default() })?;
    let report = fixture.run(&[]).await?;

    assert!(!report.success);
    assert!(report.failed_tasks().contains(&"quality_trim".to_string()), "{:?}", report.failed_tasks());
    let trim = report
        .failures
        .iter()
        .find(|f| f.task == TaskId::Stage(StageName::QualityTrim))
        .ok_or_else(|| anyhow::anyhow!("quality_trim missing from failures"))?;
    assert!(trim.stderr.contains("invalid minimum length"));
    assert!(trim.detail.contains("exit code 2"));

    assert!(!report.workspace.exists());
    assert_eq!(fs::read_dir(fixture.path("tmp"))?.count(), 0);

    let stderrs = fixture.files_matching("logs", "_stderrs_")?;
    let diagnostics = fs::read_to_string(fixture.path("logs").join(&stderrs[0]))?;
    assert!(diagnostics.contains("ERROR: [quality_trim] sickle: invalid minimum length"));

    match report.into_result() {
        Err(PipelineError::StageFailure { stages }) => assert!(stages.contains(&"quality_trim".to_string())),
        other => panic!("expected stage failure, got success = {:?}", other.map(|r| r.success)),
    }
    Ok(())
}

#[tokio::test]
async fn test_prior_out_of_range_spawns_nothing() -> Result<()> {
    let fixture = Fixture::new(MockBehaviour::default())?;
    for prior in ["0", "1"] {
        let mut argv = fixture.args.clone();
        let at = argv.iter().position(|a| a == "-r").ok_or_else(|| anyhow::anyhow!("no -r"))?;
        argv[at + 1] = prior.to_string();
        let args = Arguments::try_parse_from(argv)?;
        let err = RunConfig::from_args(&args, fixture.dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)), "prior {} gave {:?}", prior, err);
    }
    assert!(!fixture.path("logs").exists());
    assert_eq!(fs::read_dir(fixture.path("tmp"))?.count(), 0);
    assert!(fixture.files_matching(".", "_report.txt")?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_skip_is_configuration_error() -> Result<()> {
    let fixture = Fixture::new(MockBehaviour::default())?;
    let err = match fixture.run(&["-s", "trimmomatic"]).await {
        Ok(report) => panic!("run succeeded: {}", report.success),
        Err(e) => e,
    };
    assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Configuration(_))));
    assert!(!fixture.path("logs").exists());
    assert_eq!(fs::read_dir(fixture.path("tmp"))?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_disabled_stderr_log() -> Result<()> {
    let fixture = Fixture::new(MockBehaviour::default())?;
    let report = fixture.run(&["-S", "-s", "seqqs"]).await?;
    assert!(report.success);
    assert_eq!(report.bypassed.len(), 3);
    assert!(fixture.files_matching("logs", "_stderrs_")?.is_empty());
    assert!(fixture.files_matching(".", "_report.txt")?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_relative_prefix_reports_land_beside_logs() -> Result<()> {
    let fixture = Fixture::new(MockBehaviour::default())?;
    let mut argv = fixture.args.clone();
    let at = argv.iter().position(|a| a == "-p").ok_or_else(|| anyhow::anyhow!("no -p"))?;
    argv[at + 1] = "reports/sample".to_string();
    fs::create_dir_all(fixture.path("reports"))?;

    let config = RunConfig::from_args(&Arguments::try_parse_from(argv)?, fixture.dir.path())?;
    let report = tokio::time::timeout(Duration::from_secs(30), paired_qc::run(Arc::new(config))).await??;
    assert!(report.success, "failures: {:?}", report.failures);

    assert_eq!(fixture.files_matching("reports", "_report.txt")?.len(), 3);
    assert_eq!(fixture.files_matching("logs", "sample_cmds_")?.len(), 1);
    Ok(())
}
