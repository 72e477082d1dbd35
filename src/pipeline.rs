//! One configurable run: load, clean, derive, fit every configured
//! specification for every outcome, write the outputs.

use std::fs;
use std::path::PathBuf;

use polars::prelude::DataFrame;
use tracing::info;

use crate::cleaner::{clean_panel, CleanOptions};
use crate::config::PipelineConfig;
use crate::error::PanelError;
use crate::loader::load_panel;
use crate::regression::{fit_specification, RegressionResult};
use crate::report::{write_result, write_results_json, write_trends};
use crate::spec::SpecFamily;
use crate::variables::construct_variables;
use crate::visualization::extract_trends;

#[derive(Debug)]
pub struct RunSummary {
    pub results: Vec<RegressionResult>,
    pub written: Vec<PathBuf>,
}

/// Clean a normalized panel and derive the analysis variables.
pub fn prepare_panel(normalized: &DataFrame, options: CleanOptions) -> Result<DataFrame, PanelError> {
    let cleaned = clean_panel(normalized.clone(), options)?;
    construct_variables(cleaned)
}

/// Build and fit one family for one outcome on a prepared panel.
pub fn fit_family(
    panel: &DataFrame,
    family: SpecFamily,
    outcome: &str,
    controls: &[String],
) -> Result<RegressionResult, PanelError> {
    let spec = family.build(outcome, controls, panel)?;
    fit_specification(panel, &spec)
}

pub fn run(config: &PipelineConfig) -> Result<RunSummary, PanelError> {
    config.validate()?;
    let normalized = load_panel(&config.input)?;
    run_on_panel(config, &normalized)
}

/// Run every configured fit on an already loaded (normalized) panel.
///
/// The first failing fit aborts the run.
pub fn run_on_panel(config: &PipelineConfig, normalized: &DataFrame) -> Result<RunSummary, PanelError> {
    fs::create_dir_all(&config.output_dir)?;

    let full = prepare_panel(normalized, CleanOptions::default())?;
    let river = if config.needs_river_panel() {
        Some(prepare_panel(
            normalized,
            CleanOptions {
                require_river: true,
            },
        )?)
    } else {
        None
    };
    info!(
        rows = full.height(),
        river_rows = river.as_ref().map(|r| r.height()),
        "prepared panels"
    );

    let mut results = Vec::new();
    let mut written = Vec::new();
    for &family in &config.specifications {
        let panel = match (family.requires_river(), &river) {
            (true, Some(river)) => river,
            _ => &full,
        };
        for outcome in &config.outcomes {
            let result = fit_family(panel, family, outcome, &config.controls)?;
            written.extend(write_result(&result, &config.output_dir)?);
            results.push(result);
        }
    }

    for outcome in &config.outcomes {
        let trends = extract_trends(&full, outcome)?;
        written.push(write_trends(&trends, &config.output_dir)?);
    }
    written.push(write_results_json(&results, &config.output_dir)?);

    info!(
        fits = results.len(),
        files = written.len(),
        output_dir = %config.output_dir.display(),
        "run complete"
    );
    Ok(RunSummary { results, written })
}
