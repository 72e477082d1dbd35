use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PanelError;
use crate::schema::{controls, pollutant};
use crate::spec::SpecFamily;

/// Run configuration, loadable from a JSON file. Missing fields take their
/// defaults; unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub outcomes: Vec<String>,
    pub controls: Vec<String>,
    pub specifications: Vec<SpecFamily>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/india_waters_cityyear.dta"),
            output_dir: PathBuf::from("results"),
            outcomes: [pollutant::BOD, pollutant::DO, pollutant::FCOLI, pollutant::LN_FCOLI]
                .map(String::from)
                .to_vec(),
            controls: controls::DEFAULT.map(String::from).to_vec(),
            specifications: vec![SpecFamily::Ddd, SpecFamily::DidFe, SpecFamily::EventStudy],
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, PanelError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PanelError> {
        if self.outcomes.is_empty() {
            return Err(PanelError::Validation("no outcomes configured".into()));
        }
        if self.specifications.is_empty() {
            return Err(PanelError::Validation("no specifications configured".into()));
        }
        Ok(())
    }

    /// True when any configured family needs the river-filtered panel.
    pub fn needs_river_panel(&self) -> bool {
        self.specifications.iter().any(|s| s.requires_river())
    }
}
