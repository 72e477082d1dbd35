pub mod cleaner;
pub mod config;
pub mod design;
pub mod error;
pub mod hdfe;
pub mod loader;
pub mod ols;
pub mod pipeline;
pub mod regression;
pub mod report;
pub mod schema;
pub mod spec;
pub mod stata;
pub mod variables;
pub mod visualization;

#[cfg(feature = "python")]
mod model;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use error::PanelError;
pub use pipeline::{run, RunSummary};
pub use regression::RegressionResult;
pub use spec::{SpecFamily, Specification};

#[cfg(feature = "python")]
mod python {
    use pyo3::prelude::*;
    use pyo3::types::PyModule;

    use crate::model::PanelStudy;
    use crate::schema;

    /// Export schema constants as Python submodules
    fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
        // Identifiers
        let ids = PyModule::new(m.py(), "ids")?;
        ids.add("STATE", schema::ids::STATE)?;
        ids.add("RIVER", schema::ids::RIVER)?;
        ids.add("DISTRICT", schema::ids::DISTRICT)?;
        ids.add("CITY", schema::ids::CITY)?;
        ids.add("YEAR", schema::ids::YEAR)?;
        m.add_submodule(&ids)?;

        // Pollutants
        let pollutant = PyModule::new(m.py(), "pollutant")?;
        pollutant.add("BOD", schema::pollutant::BOD)?;
        pollutant.add("FCOLI", schema::pollutant::FCOLI)?;
        pollutant.add("LN_FCOLI", schema::pollutant::LN_FCOLI)?;
        pollutant.add("DO", schema::pollutant::DO)?;
        m.add_submodule(&pollutant)?;

        // Treatment
        let treatment = PyModule::new(m.py(), "treatment")?;
        treatment.add("NRCP", schema::treatment::NRCP)?;
        m.add_submodule(&treatment)?;

        // Corruption
        let corruption = PyModule::new(m.py(), "corruption")?;
        corruption.add("LEVEL", schema::corruption::LEVEL)?;
        corruption.add("SCORE", schema::corruption::SCORE)?;
        corruption.add("TOP5", schema::corruption::TOP5)?;
        corruption.add("BOTTOM5", schema::corruption::BOTTOM5)?;
        corruption.add("LEVELS", schema::corruption::LEVELS.to_vec())?;
        corruption.add("SCORE_THRESHOLD", schema::corruption::SCORE_THRESHOLD)?;
        m.add_submodule(&corruption)?;

        // Controls
        let controls = PyModule::new(m.py(), "controls")?;
        controls.add("POP_URBAN", schema::controls::POP_URBAN)?;
        controls.add("LIT_URBAN", schema::controls::LIT_URBAN)?;
        controls.add("POVGAP", schema::controls::POVGAP)?;
        controls.add("TOTAL_INDUSTRIES", schema::controls::TOTAL_INDUSTRIES)?;
        controls.add("PCE", schema::controls::PCE)?;
        m.add_submodule(&controls)?;

        // Derived
        let derived = PyModule::new(m.py(), "derived")?;
        derived.add("POST", schema::derived::POST)?;
        derived.add("CORRUPTION", schema::derived::CORRUPTION)?;
        derived.add("NRCP_POST", schema::derived::NRCP_POST)?;
        derived.add(
            "NRCP_POST_CORRUPTION",
            schema::derived::NRCP_POST_CORRUPTION,
        )?;
        derived.add("FIRST_TREATMENT", schema::derived::FIRST_TREATMENT)?;
        derived.add("COHORT", schema::derived::COHORT)?;
        derived.add("EVER_TREATED", schema::derived::EVER_TREATED)?;
        derived.add("EVENT_TIME", schema::derived::EVENT_TIME)?;
        m.add_submodule(&derived)?;

        Ok(())
    }

    #[pymodule]
    fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PanelStudy>()?;
        add_schema_exports(m)?;
        Ok(())
    }
}
