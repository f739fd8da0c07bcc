//! DASH packager command line
//!
//! Packages one or more input files into fragmented MP4 segments and a
//! static MPD manifest.

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dash_packager::config::{LogFormat, LoggingConfig};
use dash_packager::{InputSpec, PackageReport, Packager, PackagerConfig, Result};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "dash-packager";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file, or `file#N` for stream N only. Repeatable.
    #[arg(short, long = "input", required = true)]
    inputs: Vec<InputSpec>,

    /// Directory receiving the manifest and the segments
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Target segment duration in milliseconds
    #[arg(long, value_name = "MS")]
    segment_duration: Option<u64>,

    /// Store each representation in one file addressed by byte ranges
    #[arg(long)]
    single_file: bool,

    /// Address segments through a SegmentTemplate
    #[arg(long)]
    segment_template: bool,

    /// Describe segments with a SegmentTimeline
    #[arg(long)]
    segment_timeline: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<(PackagerConfig, Vec<InputSpec>, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => PackagerConfig::from_file(path)?,
            None => PackagerConfig::default(),
        };
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(ms) = self.segment_duration {
            config.segment.target_duration_ms = ms;
        }
        if self.single_file {
            config.layout.single_file = true;
        }
        if self.segment_template {
            config.layout.segment_template = true;
        }
        if self.segment_timeline {
            config.layout.segment_timeline = true;
        }
        config.validate()?;
        Ok((config, self.inputs, self.report))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, inputs, report_path) = match args.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}: {}", APP_NAME, e);
            std::process::exit(2);
        }
    };

    init_logging(&config.logging);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::debug!("Configuration: {:?}", config);

    let packager = Packager::new(config);
    let outcome = match packager.run_files(&inputs).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Packaging failed: {}", e);
            std::process::exit(2);
        }
    };

    log_summary(&outcome.report);
    if let Some(path) = report_path {
        if let Err(e) = write_report(&outcome.report, &path) {
            tracing::error!("Failed to write report {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
    std::process::exit(outcome.report.exit_code());
}

fn log_summary(report: &PackageReport) {
    for rep in &report.representations {
        match &rep.error {
            None => tracing::info!(
                "[{}] {} {}: {} segments, {:.3}s",
                rep.key,
                rep.kind,
                rep.codecs,
                rep.segments,
                rep.total_duration
            ),
            Some(e) => tracing::error!(
                "[{}] {} {}: failed after {} segments: {}",
                rep.key,
                rep.kind,
                rep.codecs,
                rep.segments,
                e
            ),
        }
    }
    tracing::info!(
        "Manifest {} ({:.3}s)",
        report.manifest_path.display(),
        report.presentation_duration
    );
}

fn write_report(report: &PackageReport, path: &Path) -> Result<()> {
    std::fs::write(path, report.to_json()?)?;
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("dash_packager={}", logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
