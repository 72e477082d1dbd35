//! nrcp-waters CLI

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use nrcp_waters::config::PipelineConfig;
use nrcp_waters::pipeline;
use nrcp_waters::report::summary_text;
use nrcp_waters::spec::SpecFamily;

#[derive(Parser)]
#[command(name = "nrcp-waters")]
#[command(about = "River pollution, the NRCP and corruption: panel regressions")]
#[command(version)]
struct Cli {
    /// JSON run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Panel file (.dta, .csv or .parquet); overrides the configuration
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory; overrides the configuration
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Outcome to fit (repeatable); overrides the configuration
    #[arg(long = "outcome")]
    outcomes: Vec<String>,

    /// Specification family to fit (repeatable); overrides the configuration
    #[arg(long = "spec", value_parser = parse_family)]
    specifications: Vec<SpecFamily>,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn parse_family(s: &str) -> Result<SpecFamily, String> {
    SpecFamily::parse(s).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(input) = cli.input {
        config.input = input;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if !cli.outcomes.is_empty() {
        config.outcomes = cli.outcomes;
    }
    if !cli.specifications.is_empty() {
        config.specifications = cli.specifications;
    }

    let summary = pipeline::run(&config)
        .with_context(|| format!("running pipeline on {}", config.input.display()))?;
    for result in &summary.results {
        print!("{}", summary_text(result));
    }
    Ok(())
}
