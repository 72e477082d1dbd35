use polars::prelude::*;
use tracing::debug;

use crate::error::PanelError;
use crate::schema::*;

/// Row filters applied before variable construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Drop rows without a river identifier (event-study panels).
    pub require_river: bool,
}

/// Clean a normalized panel.
///
/// Drops rows that are entirely missing, rows without a valid corruption
/// category, rows without a river (if requested) and rows whose treatment
/// indicator is not 0/1, then sorts by (state, river, city, year).
/// An empty result is returned as-is.
pub fn clean_panel(df: DataFrame, options: CleanOptions) -> Result<DataFrame, PanelError> {
    let start = df.height();
    let df = drop_empty_rows(df)?;
    debug!(dropped = start - df.height(), "removed empty rows");

    let levels = Series::new("levels".into(), corruption::LEVELS.to_vec());
    let mut lazy = df
        .lazy()
        .filter(col(corruption::LEVEL).is_in(lit(levels), false));

    if options.require_river {
        lazy = lazy.filter(
            col(ids::RIVER)
                .is_not_null()
                .and(col(ids::RIVER).neq(lit(""))),
        );
    }

    let df = lazy
        .filter(
            col(treatment::NRCP)
                .eq(lit(0.0))
                .or(col(treatment::NRCP).eq(lit(1.0))),
        )
        .sort(
            [ids::STATE, ids::RIVER, ids::CITY, ids::YEAR],
            SortMultipleOptions::default()
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .collect()?;

    debug!(
        rows_in = start,
        rows_out = df.height(),
        require_river = options.require_river,
        "cleaned panel"
    );
    Ok(df)
}

/// Remove rows in which every column is null.
fn drop_empty_rows(df: DataFrame) -> Result<DataFrame, PanelError> {
    let mut keep = BooleanChunked::full("keep".into(), false, df.height());
    for column in df.get_columns() {
        keep = &keep | &column.is_not_null();
    }
    Ok(df.filter(&keep)?)
}
