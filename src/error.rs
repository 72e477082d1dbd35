use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stata file: {0}")]
    Stata(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("{spec}: cluster variable has {clusters} distinct value(s), need at least 2")]
    DegenerateClusters { spec: String, clusters: usize },

    #[error("{spec}: term '{term}' is collinear with the fixed effects")]
    CollinearWithFixedEffects { spec: String, term: String },

    #[error("{spec}: design matrix has rank {rank} < {columns} columns")]
    RankDeficient {
        spec: String,
        rank: usize,
        columns: usize,
    },

    #[error("{spec}: {n_obs} observations for {n_params} parameters")]
    InsufficientObservations {
        spec: String,
        n_obs: usize,
        n_params: usize,
    },
}

impl PanelError {
    /// True for failures raised while fitting a model (as opposed to I/O or data shape).
    pub fn is_fitting_error(&self) -> bool {
        matches!(
            self,
            Self::DegenerateClusters { .. }
                | Self::CollinearWithFixedEffects { .. }
                | Self::RankDeficient { .. }
                | Self::InsufficientObservations { .. }
        )
    }
}

#[cfg(feature = "python")]
impl From<PanelError> for pyo3::PyErr {
    fn from(err: PanelError) -> pyo3::PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}
