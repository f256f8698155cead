#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

mod atlas;
mod clusters;
mod pipeline;
mod regions;
mod report;
mod structs;
mod volume;

use clap::Parser;
use report::render::OrthoSliceRenderer;
use std::path::PathBuf;
use structs::{ClusterSettings, JobConfig, ReportSettings, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit code when at least one input file could not be processed
const EXIT_FILE_FAILURES: i32 = 2;

/// anatomy-insight - cluster tables and atlas-labelled HTML reports for statistical maps
#[derive(Parser, Debug)]
#[command(name = "anatomy-insight")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Statistical maps to analyze (.nii or .nii.gz)
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,

    /// Reference atlas: DiFuMo, Juelich, AAL3 or Brainnetome
    #[arg(short, long, default_value = "DiFuMo")]
    atlas: String,

    /// Uncorrected p-value threshold
    #[arg(short, long, default_value = "0.001")]
    threshold: f64,

    /// Directory holding the atlas resources
    #[arg(long, default_value = "atlases")]
    atlas_dir: PathBuf,

    /// Root for report directories (default: next to each input)
    #[arg(short, long)]
    output_root: Option<PathBuf>,

    /// Minimum cluster size in voxels
    #[arg(long, default_value = "10")]
    min_cluster_voxels: usize,

    /// Only threshold the positive tail
    #[arg(long)]
    one_sided: bool,

    /// Minimum distance between sub-peaks in mm
    #[arg(long, default_value = "8.0")]
    min_distance: f64,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(format!(
                "Threshold must be between 0 and 1 (exclusive), got {}",
                self.threshold
            ));
        }
        if !self.min_distance.is_finite() || self.min_distance < 0.0 {
            return Err(format!(
                "Minimum distance must be a non-negative number, got {}",
                self.min_distance
            ));
        }
        Ok(())
    }

    fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// `--verbose` and `--quiet` win over `RUST_LOG`, which wins over the default
    fn log_filter(&self) -> EnvFilter {
        let level =
            EnvFilter::default().add_directive(LevelFilter::from_level(self.log_level()).into());
        if self.verbose || self.quiet {
            return level;
        }
        EnvFilter::try_from_default_env().unwrap_or(level)
    }

    fn job_config(&self) -> JobConfig {
        JobConfig {
            files: self.files.clone(),
            atlas: self.atlas.clone(),
            atlas_dir: self.atlas_dir.clone(),
            report: ReportSettings {
                threshold: ClusterSettings {
                    alpha: self.threshold,
                    min_cluster_voxels: self.min_cluster_voxels,
                    two_sided: !self.one_sided,
                    min_distance_mm: self.min_distance,
                },
                output_root: self.output_root.clone(),
            },
        }
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(i32::from(e.use_stderr()));
        }
    };

    if let Err(e) = args.validate() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    init_logging(&args);

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("Run failed: {e}");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(args.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: logging disabled: {e}");
    }
}

/// Run the batch and print its summary. Returns the process exit code.
fn run(args: &Args) -> Result<i32> {
    let job = args.job_config();
    tracing::info!(
        "anatomy-insight v{}: {} file(s), atlas {}",
        env!("CARGO_PKG_VERSION"),
        job.files.len(),
        job.atlas
    );

    let summary = pipeline::run(&job, &OrthoSliceRenderer::default())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.summary());
    }

    if summary.has_file_failures() {
        return Ok(EXIT_FILE_FAILURES);
    }
    Ok(0)
}
