/// Column-name constants for the city-year panel.
/// Single source of truth - exported to Python via PyO3.

// ── Identifier columns ──────────────────────────────────────────────────────
pub mod ids {
    pub const STATE: &str = "state";
    pub const RIVER: &str = "river";
    pub const DISTRICT: &str = "district";
    pub const CITY: &str = "city";
    pub const YEAR: &str = "year";

    pub const ALL: [&str; 4] = [STATE, RIVER, DISTRICT, CITY];
}

// ── Pollutant outcomes ──────────────────────────────────────────────────────
pub mod pollutant {
    pub const BOD: &str = "bod";
    pub const FCOLI: &str = "fcoli";
    pub const LN_FCOLI: &str = "lnfcoli";
    pub const DO: &str = "do";

    pub const ALL: [&str; 4] = [BOD, DO, FCOLI, LN_FCOLI];
}

// ── Treatment ───────────────────────────────────────────────────────────────
pub mod treatment {
    pub const NRCP: &str = "nrcp";
}

// ── Corruption classification ───────────────────────────────────────────────
pub mod corruption {
    pub const LEVEL: &str = "corruption_level07";
    pub const SCORE: &str = "corruption_score05";
    pub const TOP5: &str = "top5_corrupt";
    pub const BOTTOM5: &str = "bottom5_corrupt";

    pub const MODERATE: &str = "Moderate";
    pub const HIGH: &str = "High";
    pub const VERY_HIGH: &str = "Very High";
    pub const ALARMING: &str = "Alarming";

    /// Valid category labels, reference level first.
    pub const LEVELS: [&str; 4] = [MODERATE, HIGH, VERY_HIGH, ALARMING];

    /// Scores at or below this count as not corrupt for Moderate cities.
    pub const SCORE_THRESHOLD: f64 = 480.0;
}

// ── Socioeconomic controls ──────────────────────────────────────────────────
pub mod controls {
    pub const POP_URBAN: &str = "pop_urban";
    pub const LIT_URBAN: &str = "lit_urban";
    pub const POVGAP: &str = "povgap";
    pub const TOTAL_INDUSTRIES: &str = "total_industries";
    pub const PCE: &str = "pce";

    pub const DEFAULT: [&str; 4] = [POP_URBAN, LIT_URBAN, POVGAP, TOTAL_INDUSTRIES];
}

// ── Derived columns ─────────────────────────────────────────────────────────
pub mod derived {
    pub const POST: &str = "post";
    pub const CORRUPTION: &str = "corruption";
    pub const NRCP_POST: &str = "nrcp_post";
    pub const NRCP_POST_CORRUPTION: &str = "nrcp_post_corruption";
    pub const FIRST_TREATMENT: &str = "first_treatment";
    pub const COHORT: &str = "cohort";
    pub const EVER_TREATED: &str = "ever_treated";
    pub const EVENT_TIME: &str = "event_time";

    /// First year counted as post-period.
    pub const POST_YEAR: i32 = 2000;

    /// Cohort label for cities that are never treated.
    pub const CONTROL_COHORT: &str = "control";
}

// ── Event-time window ───────────────────────────────────────────────────────
pub mod event {
    pub const MIN_OFFSET: i32 = -5;
    pub const MAX_OFFSET: i32 = 5;
    /// Omitted period; never materialized as a column.
    pub const REFERENCE: i32 = -1;

    /// Offsets that get a dummy column, ascending.
    pub fn offsets() -> Vec<i32> {
        (MIN_OFFSET..=MAX_OFFSET).filter(|&k| k != REFERENCE).collect()
    }

    /// Dummy column for an offset: `ev_m5`, ..., `ev_p0`, ..., `ev_p5`.
    pub fn dummy(offset: i32) -> String {
        if offset < 0 {
            format!("ev_m{}", -offset)
        } else {
            format!("ev_p{offset}")
        }
    }

    /// Dummy × corruption score column for an offset.
    pub fn score_interaction(offset: i32) -> String {
        format!("{}_x_score", dummy(offset))
    }
}
