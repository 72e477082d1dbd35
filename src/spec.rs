//! Regression specifications as plain data.
//!
//! A [`Specification`] names the outcome, the regressor terms, the absorbed
//! fixed-effect dimensions and the cluster key. Specifications are built from
//! a [`SpecFamily`] and can be inspected and tested without fitting anything.

use std::collections::BTreeSet;
use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PanelError;
use crate::schema::*;

/// One factor of a regressor term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Factor {
    /// A numeric column.
    Var(String),
    /// Indicator `1[column == level]` on a categorical column.
    Level { column: String, level: String },
}

impl Factor {
    pub fn column(&self) -> &str {
        match self {
            Self::Var(c) => c,
            Self::Level { column, .. } => column,
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(c) => write!(f, "{c}"),
            Self::Level { column, level } => write!(f, "{column}[T.{level}]"),
        }
    }
}

/// A regressor: the product of its factors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub factors: Vec<Factor>,
}

impl Term {
    pub fn var(column: &str) -> Self {
        Self {
            factors: vec![Factor::Var(column.to_string())],
        }
    }

    pub fn product(columns: &[&str]) -> Self {
        Self {
            factors: columns.iter().map(|c| Factor::Var(c.to_string())).collect(),
        }
    }

    /// `column × 1[category == level]`.
    pub fn by_level(column: &str, category: &str, level: &str) -> Self {
        Self {
            factors: vec![
                Factor::Var(column.to_string()),
                Factor::Level {
                    column: category.to_string(),
                    level: level.to_string(),
                },
            ],
        }
    }

    /// Display name, e.g. `nrcp:post` or `nrcp_post:corruption_level07[T.High]`.
    pub fn name(&self) -> String {
        self.factors
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// A term that belongs to an event-time profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTerm {
    pub term: String,
    pub offset: i32,
}

/// A fully specified linear model.
#[derive(Debug, Clone)]
pub struct Specification {
    /// Family name, used in output file names.
    pub name: String,
    pub outcome: String,
    pub terms: Vec<Term>,
    pub intercept: bool,
    /// Absorbed fixed-effect dimensions (categorical columns).
    pub fixed_effects: Vec<String>,
    pub cluster: String,
    /// Term names to report; `None` reports every term.
    pub reported: Option<Vec<String>>,
    /// Terms aggregated into the per-offset event profile.
    pub event_terms: Vec<EventTerm>,
    /// Drop regressors that are identically zero in the estimation sample
    /// instead of failing on them.
    pub drop_empty_terms: bool,
}

impl Specification {
    /// Every column this specification reads, in first-use order.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let all = std::iter::once(self.outcome.as_str())
            .chain(
                self.terms
                    .iter()
                    .flat_map(|t| t.factors.iter().map(|f| f.column())),
            )
            .chain(self.fixed_effects.iter().map(|s| s.as_str()))
            .chain(std::iter::once(self.cluster.as_str()));
        for c in all {
            if seen.insert(c.to_string()) {
                out.push(c.to_string());
            }
        }
        out
    }

    pub fn term_names(&self) -> Vec<String> {
        self.terms.iter().map(|t| t.name()).collect()
    }

    /// Patsy-style rendering for summaries, e.g. `bod ~ nrcp + C(city) + C(year)`.
    pub fn formula(&self) -> String {
        let mut rhs: Vec<String> = self.terms.iter().map(|t| t.name()).collect();
        rhs.extend(self.fixed_effects.iter().map(|fe| format!("C({fe})")));
        if !self.intercept && self.fixed_effects.is_empty() {
            rhs.push("0".to_string());
        }
        format!("{} ~ {}", self.outcome, rhs.join(" + "))
    }
}

/// Named specification families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecFamily {
    /// Pollution on the NRCP indicator with city and year fixed effects.
    Baseline,
    /// Triple difference on nrcp × post × corruption, no fixed effects.
    Ddd,
    /// Triple difference using the top-5 corrupt flag.
    DddTop5,
    /// Triple difference using the bottom-5 corrupt flag.
    DddBottom5,
    /// DiD with city and year fixed effects and nrcp_post × corruption category.
    DidFe,
    /// Event-time dummies × corruption score with city and year fixed effects.
    EventStudy,
    /// Cohort × event-time dummies, aggregated with interaction weights.
    SunAbraham,
}

impl SpecFamily {
    pub const ALL: [SpecFamily; 7] = [
        Self::Baseline,
        Self::Ddd,
        Self::DddTop5,
        Self::DddBottom5,
        Self::DidFe,
        Self::EventStudy,
        Self::SunAbraham,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Ddd => "ddd",
            Self::DddTop5 => "ddd_top5",
            Self::DddBottom5 => "ddd_bottom5",
            Self::DidFe => "did_fe",
            Self::EventStudy => "event_study",
            Self::SunAbraham => "sun_abraham",
        }
    }

    pub fn parse(name: &str) -> Result<Self, PanelError> {
        Self::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| {
                PanelError::Validation(format!(
                    "unknown specification '{name}' (expected one of: {})",
                    Self::ALL.map(|f| f.name()).join(", ")
                ))
            })
    }

    /// Event-study families run on the river-filtered panel.
    pub fn requires_river(&self) -> bool {
        matches!(self, Self::EventStudy | Self::SunAbraham)
    }

    /// Build the specification for one outcome.
    ///
    /// `panel` is the prepared panel the model will be fitted on; it decides
    /// which corruption categories and treatment cohorts get a term.
    pub fn build(
        &self,
        outcome: &str,
        controls: &[String],
        panel: &DataFrame,
    ) -> Result<Specification, PanelError> {
        let control_terms = controls.iter().map(|c| Term::var(c));
        let two_way_fe = vec![ids::CITY.to_string(), ids::YEAR.to_string()];

        let mut spec = Specification {
            name: self.name().to_string(),
            outcome: outcome.to_string(),
            terms: Vec::new(),
            intercept: false,
            fixed_effects: Vec::new(),
            cluster: ids::CITY.to_string(),
            reported: None,
            event_terms: Vec::new(),
            drop_empty_terms: false,
        };

        match self {
            Self::Baseline => {
                spec.terms.push(Term::var(treatment::NRCP));
                spec.terms.extend(control_terms);
                spec.fixed_effects = two_way_fe;
            }
            Self::Ddd | Self::DddTop5 | Self::DddBottom5 => {
                let c = match self {
                    Self::DddTop5 => corruption::TOP5,
                    Self::DddBottom5 => corruption::BOTTOM5,
                    _ => derived::CORRUPTION,
                };
                let (n, p) = (treatment::NRCP, derived::POST);
                spec.intercept = true;
                spec.terms = vec![
                    Term::var(n),
                    Term::var(p),
                    Term::var(c),
                    Term::product(&[n, p]),
                    Term::product(&[n, c]),
                    Term::product(&[p, c]),
                ];
                spec.terms.push(if c == derived::CORRUPTION {
                    Term::var(derived::NRCP_POST_CORRUPTION)
                } else {
                    Term::product(&[n, p, c])
                });
                spec.terms.extend(control_terms);
            }
            Self::DidFe => {
                let present = distinct_strings(panel, corruption::LEVEL)?;
                spec.terms.push(Term::var(derived::NRCP_POST));
                for level in corruption::LEVELS.iter().skip(1) {
                    if present.contains(*level) {
                        spec.terms.push(Term::by_level(
                            derived::NRCP_POST,
                            corruption::LEVEL,
                            level,
                        ));
                    }
                }
                spec.terms.extend(control_terms);
                spec.fixed_effects = two_way_fe;
                spec.drop_empty_terms = true;
            }
            Self::EventStudy => {
                for offset in event::offsets() {
                    let term = Term::var(&event::score_interaction(offset));
                    spec.event_terms.push(EventTerm {
                        term: term.name(),
                        offset,
                    });
                    spec.terms.push(term);
                }
                spec.reported = Some(spec.event_terms.iter().map(|e| e.term.clone()).collect());
                spec.terms.extend(control_terms);
                spec.fixed_effects = two_way_fe;
                spec.drop_empty_terms = true;
            }
            Self::SunAbraham => {
                let mut cohorts: Vec<String> = distinct_strings(panel, derived::COHORT)?
                    .into_iter()
                    .filter(|c| c != derived::CONTROL_COHORT)
                    .collect();
                cohorts.sort_by_key(|c| c.parse::<u32>().unwrap_or(u32::MAX));
                for cohort in &cohorts {
                    for offset in event::offsets() {
                        let term = Term {
                            factors: vec![
                                Factor::Level {
                                    column: derived::COHORT.to_string(),
                                    level: cohort.clone(),
                                },
                                Factor::Var(event::dummy(offset)),
                            ],
                        };
                        spec.event_terms.push(EventTerm {
                            term: term.name(),
                            offset,
                        });
                        spec.terms.push(term);
                    }
                }
                spec.reported = Some(spec.event_terms.iter().map(|e| e.term.clone()).collect());
                spec.terms.extend(control_terms);
                spec.fixed_effects = two_way_fe;
                spec.drop_empty_terms = true;
            }
        }
        Ok(spec)
    }
}

impl fmt::Display for SpecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn distinct_strings(df: &DataFrame, column: &str) -> Result<BTreeSet<String>, PanelError> {
    Ok(df
        .column(column)?
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .flatten()
        .map(|s| s.to_string())
        .collect())
}
