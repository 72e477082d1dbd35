use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use tracing::info;

use crate::error::PanelError;
use crate::schema::*;
use crate::stata;

/// Numeric analysis columns, cast to Float64 on load.
const NUMERIC_COLUMNS: [&str; 13] = [
    treatment::NRCP,
    pollutant::BOD,
    pollutant::FCOLI,
    pollutant::LN_FCOLI,
    pollutant::DO,
    corruption::SCORE,
    corruption::TOP5,
    corruption::BOTTOM5,
    controls::POP_URBAN,
    controls::LIT_URBAN,
    controls::POVGAP,
    controls::TOTAL_INDUSTRIES,
    controls::PCE,
];

/// Columns that may be absent from the input file.
const OPTIONAL_COLUMNS: [&str; 1] = [controls::PCE];

/// Load the city-year panel and normalize it to the analysis schema.
///
/// The format is picked from the extension: `.dta` (Stata), `.csv` or `.parquet`.
pub fn load_panel(path: &Path) -> Result<DataFrame, PanelError> {
    let raw = read_raw(path)?;
    info!(
        path = %path.display(),
        rows = raw.height(),
        columns = raw.width(),
        "loaded panel"
    );
    normalize_panel(raw)
}

fn read_raw(path: &Path) -> Result<DataFrame, PanelError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "dta" => stata::read_dta(path),
        "csv" => Ok(CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?),
        "parquet" => Ok(ParquetReader::new(File::open(path)?).finish()?),
        other => Err(PanelError::InvalidData(format!(
            "Unsupported panel file extension '{other}' for {}",
            path.display()
        ))),
    }
}

/// Keep the analysis columns and give them their canonical dtypes:
/// identifiers and the corruption category as String, `year` as Int32,
/// everything else as Float64.
pub fn normalize_panel(raw: DataFrame) -> Result<DataFrame, PanelError> {
    // Trim whitespace from column names
    let mut raw = raw;
    let trimmed: Vec<String> = raw
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    raw.set_column_names(trimmed.as_slice())?;

    let mut required: Vec<&str> = ids::ALL.to_vec();
    required.push(ids::YEAR);
    required.push(corruption::LEVEL);
    required.extend(
        NUMERIC_COLUMNS
            .iter()
            .filter(|c| !OPTIONAL_COLUMNS.contains(c)),
    );
    require_columns(&raw, &required)?;

    let schema = raw.schema();
    let mut exprs: Vec<Expr> = Vec::new();
    for name in ids::ALL.iter().chain([&corruption::LEVEL]) {
        exprs.push(col(*name).cast(DataType::String));
    }
    exprs.push(col(ids::YEAR).cast(DataType::Int32));
    for name in NUMERIC_COLUMNS {
        if schema.contains(name) {
            exprs.push(col(name).cast(DataType::Float64));
        }
    }

    Ok(raw.lazy().select(exprs).collect()?)
}

pub(crate) fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), PanelError> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(PanelError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}
