use std::path::PathBuf;

use polars::prelude::*;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;

use crate::cleaner::CleanOptions;
use crate::config::PipelineConfig;
use crate::loader::load_panel;
use crate::pipeline::{fit_family, prepare_panel, run_on_panel};
use crate::spec::SpecFamily;

#[pyclass]
pub struct PanelStudy {
    config: PipelineConfig,
    panel: Option<DataFrame>,
}

impl PanelStudy {
    /// Normalized panel, loaded on first use.
    fn normalized(&mut self) -> PyResult<&DataFrame> {
        if self.panel.is_none() {
            self.panel = Some(load_panel(&self.config.input)?);
        }
        self.panel
            .as_ref()
            .ok_or_else(|| PyValueError::new_err("panel not loaded"))
    }
}

#[pymethods]
impl PanelStudy {
    #[new]
    #[pyo3(signature = (input, output_dir=None))]
    fn new(input: String, output_dir: Option<String>) -> Self {
        let mut config = PipelineConfig {
            input: PathBuf::from(input),
            ..Default::default()
        };
        if let Some(dir) = output_dir {
            config.output_dir = PathBuf::from(dir);
        }
        Self {
            config,
            panel: None,
        }
    }

    // ── Data ────────────────────────────────────────────────────────────────

    /// Load the panel file and return it with canonical column types.
    fn load(&mut self) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(self.normalized()?.clone()))
    }

    /// Cleaned panel with every derived variable.
    #[pyo3(signature = (require_river=false))]
    fn prepare(&mut self, require_river: bool) -> PyResult<PyDataFrame> {
        let df = prepare_panel(self.normalized()?, CleanOptions { require_river })?;
        Ok(PyDataFrame(df))
    }

    // ── Estimation ──────────────────────────────────────────────────────────

    /// Fit one specification family for one outcome.
    ///
    /// Returns the reported coefficients: term, estimate, std_error, z,
    /// p_value, ci_low, ci_high.
    #[pyo3(signature = (outcome, family, controls=None))]
    fn fit(
        &mut self,
        outcome: &str,
        family: &str,
        controls: Option<Vec<String>>,
    ) -> PyResult<PyDataFrame> {
        let family = SpecFamily::parse(family).map_err(|e| PyValueError::new_err(e.to_string()))?;
        let controls = controls.unwrap_or_else(|| self.config.controls.clone());
        let options = CleanOptions {
            require_river: family.requires_river(),
        };
        let panel = prepare_panel(self.normalized()?, options)?;
        let result = fit_family(&panel, family, outcome, &controls)?;
        Ok(PyDataFrame(result.to_frame()?))
    }

    /// Run the configured pipeline and return the paths written.
    #[pyo3(signature = (specifications=None, outcomes=None))]
    fn run(
        &mut self,
        specifications: Option<Vec<String>>,
        outcomes: Option<Vec<String>>,
    ) -> PyResult<Vec<String>> {
        if let Some(names) = specifications {
            self.config.specifications = names
                .iter()
                .map(|n| SpecFamily::parse(n))
                .collect::<Result<_, _>>()
                .map_err(|e| PyValueError::new_err(e.to_string()))?;
        }
        if let Some(outcomes) = outcomes {
            self.config.outcomes = outcomes;
        }
        self.config.validate()?;
        let config = self.config.clone();
        let summary = run_on_panel(&config, self.normalized()?)?;
        Ok(summary
            .written
            .iter()
            .map(|p| p.display().to_string())
            .collect())
    }
}
