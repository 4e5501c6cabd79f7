use std::io::{self, BufRead as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use tracing::error;

use sbom_merge::config::{CONFIG_FILE_NAME, MergeConfig, ReducePolicy};
use sbom_merge::invoker::{CycloneDxCli, MergeEngine};
use sbom_merge::pipeline::{InputSource, Pipeline};
use sbom_merge::progress::{NoProgress, ProgressBarReporter, ProgressReporter};

mod format;
mod telemetry;

use format::OutputFormat;

/// Merge SBOM XML fragments with the `CycloneDX` CLI
///
/// Input files are split into fixed-size chunks and each chunk is merged by
/// a bounded pool of worker threads into `intermediate_<n>.xml`. When every
/// chunk merged, the intermediates are merged once more into
/// `final_merged.xml` in the same directory.
///
/// Re-running over the same directory skips chunks whose intermediate
/// already exists, so an interrupted run can be resumed.
///
/// EXAMPLES:
///
///   sbom-merge -z sboms.zip
///
///   sbom-merge -d ./sboms --chunk-size 10 --threads 8
///
///   sbom-merge -d ./sboms --format json --no-progress
#[derive(Parser)]
#[command(name = "sbom-merge")]
#[command(version, about)]
#[command(after_help = "Options not given on the command line are read from sbom-merge.toml.")]
struct Cli {
    /// Path to a zip archive of SBOM XML files
    #[arg(short = 'z', long, value_name = "PATH", conflicts_with = "directory")]
    zipfile: Option<PathBuf>,

    /// Path to a directory of SBOM XML files
    #[arg(short = 'd', long, value_name = "PATH")]
    directory: Option<PathBuf>,

    /// Number of files to merge in each chunk [default: 5]
    #[arg(long, env = "SBOM_MERGE_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Number of chunks merged in parallel [default: 4]
    #[arg(long, env = "SBOM_MERGE_THREADS")]
    threads: Option<usize>,

    /// Seconds to wait for the chunk stage, 0 for no limit [default: 120]
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Merge tool to run [default: cyclonedx]
    #[arg(long, env = "SBOM_MERGE_TOOL")]
    tool: Option<String>,

    /// Scope intermediate files to this id (intermediate_<id>_<n>.xml)
    #[arg(long)]
    run_id: Option<String>,

    /// What to do with missing intermediates: strict or lenient
    #[arg(long, value_name = "POLICY")]
    reduce_policy: Option<ReducePolicy>,

    /// Config file [default: ./sbom-merge.toml]
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,

    /// Summary format: text or json
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Log more (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Config file values with command-line flags applied on top.
    fn merge_config(&self) -> Result<MergeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    bail!(
                        "config file {} does not exist\n  To fix: check the --config path",
                        path.display()
                    );
                }
                MergeConfig::load(path)?
            }
            None => MergeConfig::load(Path::new(CONFIG_FILE_NAME))?,
        };

        if let Some(chunk_size) = self.chunk_size {
            config.batch.chunk_size = chunk_size;
        }
        if let Some(threads) = self.threads {
            config.batch.threads = threads;
        }
        if let Some(timeout) = self.timeout {
            config.batch.timeout_seconds = timeout;
        }
        if let Some(tool) = &self.tool {
            tool.clone_into(&mut config.engine.program);
        }
        if let Some(run_id) = &self.run_id {
            config.artifacts.run_id = Some(run_id.clone());
        }
        if let Some(policy) = self.reduce_policy {
            config.reduce.policy = policy;
        }
        Ok(config)
    }

    /// The input named on the command line, or asked for on stdin.
    fn input_source(&self) -> Result<InputSource> {
        if let Some(dir) = &self.directory {
            return Ok(InputSource::Directory(dir.clone()));
        }
        if let Some(zip) = &self.zipfile {
            return Ok(InputSource::Archive(zip.clone()));
        }
        let path = prompt_for_path()?;
        if path.is_dir() {
            Ok(InputSource::Directory(path))
        } else {
            Ok(InputSource::Archive(path))
        }
    }
}

fn prompt_for_path() -> Result<PathBuf> {
    let mut stderr = io::stderr();
    write!(stderr, "Enter the path to the SBOM zip file or directory: ")?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| anyhow!("failed to read path from stdin: {e}"))?;
    let path = line.trim();
    if path.is_empty() {
        bail!("no input path given\n  To fix: pass --zipfile <PATH> or --directory <PATH>");
    }
    Ok(PathBuf::from(path))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("The merging process encountered errors.");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

/// Run one merge. `Ok(false)` means the run finished but some merge failed.
fn run(cli: &Cli) -> Result<bool> {
    let config = cli.merge_config()?;
    let source = cli.input_source()?;

    let engine: Arc<dyn MergeEngine> = Arc::new(CycloneDxCli::from_config(&config.engine));
    let show_progress = !cli.no_progress && cli.format == OutputFormat::Text;
    let reporter: Box<dyn ProgressReporter> = if show_progress {
        Box::new(ProgressBarReporter::new())
    } else {
        Box::new(NoProgress)
    };

    let report = Pipeline::new(&config, engine, reporter.as_ref()).run_source(&source)?;

    match cli.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", cli.format.serialize(&report)?),
    }
    Ok(report.success)
}
