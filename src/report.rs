use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::PanelError;
use crate::regression::RegressionResult;
use crate::visualization::{event_study_svg, trends_svg, ChartConfig, TrendSeries};

pub const RESULTS_JSON: &str = "results.json";

/// Plain-text coefficient table.
pub fn summary_text(result: &RegressionResult) -> String {
    let rule = "=".repeat(86);
    let thin = "-".repeat(86);
    let mut s = String::new();
    s.push_str(&rule);
    s.push('\n');
    s.push_str(&format!(
        "Specification: {:<24} Outcome: {}\n",
        result.specification, result.outcome
    ));
    s.push_str(&format!("Model: {}\n", result.formula));
    s.push_str(&format!(
        "Observations: {:<10} Clusters (city): {:<8} Absorbed df: {:<6} R-squared: {:.4}\n",
        result.n_obs, result.n_clusters, result.df_absorbed, result.r_squared
    ));
    s.push_str("Covariance: cluster-robust (city)\n");
    s.push_str(&thin);
    s.push('\n');
    s.push_str(&format!(
        "{:<38}{:>10}{:>10}{:>8}{:>8}{:>12}\n",
        "", "coef", "std err", "z", "P>|z|", "[95% CI]"
    ));
    s.push_str(&thin);
    s.push('\n');
    for c in &result.coefficients {
        s.push_str(&format!(
            "{:<38}{:>10.4}{:>10.4}{:>8.3}{:>8.3}  [{:.4}, {:.4}]\n",
            truncate(&c.term, 37),
            c.estimate,
            c.std_error,
            c.z,
            c.p_value,
            c.ci_low,
            c.ci_high
        ));
    }
    if !result.dropped_terms.is_empty() {
        s.push_str(&thin);
        s.push('\n');
        s.push_str(&format!(
            "Dropped (no observations): {}\n",
            result.dropped_terms.join(", ")
        ));
    }
    if !result.event_profile.is_empty() {
        s.push_str(&thin);
        s.push('\n');
        s.push_str("Event-time profile\n");
        for p in &result.event_profile {
            if p.reference {
                s.push_str(&format!("  t={:>3}  {:>10}  (reference)\n", p.offset, "0"));
            } else {
                s.push_str(&format!(
                    "  t={:>3}  {:>10.4}  se {:.4}  [{:.4}, {:.4}]\n",
                    p.offset, p.estimate, p.std_error, p.ci_low, p.ci_high
                ));
            }
        }
    }
    s.push_str(&rule);
    s.push('\n');
    s
}

/// LaTeX table: estimate with stars, standard error in parentheses below.
pub fn latex_table(result: &RegressionResult) -> String {
    let mut s = String::new();
    s.push_str("\\begin{table}[htbp]\n\\centering\n");
    s.push_str(&format!(
        "\\caption{{{} -- {}}}\n",
        escape_latex(&result.outcome),
        escape_latex(&result.specification)
    ));
    s.push_str("\\begin{tabular}{lc}\n\\hline\\hline\n");
    s.push_str(&format!(" & {} \\\\\n\\hline\n", escape_latex(&result.outcome)));
    for c in &result.coefficients {
        s.push_str(&format!(
            "{} & ${:.4}{}$ \\\\\n & ({:.4}) \\\\\n",
            escape_latex(&c.term),
            c.estimate,
            stars(c.p_value),
            c.std_error
        ));
    }
    s.push_str("\\hline\n");
    s.push_str(&format!("Observations & {} \\\\\n", result.n_obs));
    s.push_str(&format!("Clusters & {} \\\\\n", result.n_clusters));
    s.push_str(&format!("$R^2$ & {:.4} \\\\\n", result.r_squared));
    s.push_str("\\hline\\hline\n\\end{tabular}\n");
    s.push_str(
        "\\par\\footnotesize Standard errors clustered by city in parentheses. \
         *** $p<0.01$, ** $p<0.05$, * $p<0.1$.\n",
    );
    s.push_str("\\end{table}\n");
    s
}

fn stars(p: f64) -> &'static str {
    match p {
        p if p < 0.01 => "^{***}",
        p if p < 0.05 => "^{**}",
        p if p < 0.1 => "^{*}",
        _ => "",
    }
}

fn escape_latex(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '_' | '&' | '%' | '$' | '#' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            '\\' => out.push_str("\\textbackslash{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            _ => out.push(ch),
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}~")
    }
}

/// Write `<outcome>_<spec>.txt`, `.tex` and, for event studies, `.svg`.
pub fn write_result(result: &RegressionResult, out_dir: &Path) -> Result<Vec<PathBuf>, PanelError> {
    let stem = format!("{}_{}", result.outcome, result.specification);
    let mut written = Vec::new();

    let txt = out_dir.join(format!("{stem}.txt"));
    fs::write(&txt, summary_text(result))?;
    written.push(txt);

    let tex = out_dir.join(format!("{stem}.tex"));
    fs::write(&tex, latex_table(result))?;
    written.push(tex);

    if let Some(svg) = event_study_svg(result, &ChartConfig::default()) {
        let path = out_dir.join(format!("{stem}.svg"));
        fs::write(&path, svg)?;
        written.push(path);
    }
    for path in &written {
        info!(path = %path.display(), "wrote");
    }
    Ok(written)
}

pub fn write_trends(series: &TrendSeries, out_dir: &Path) -> Result<PathBuf, PanelError> {
    let path = out_dir.join(format!("{}_trends.svg", series.outcome));
    fs::write(&path, trends_svg(series, &ChartConfig::default()))?;
    info!(path = %path.display(), "wrote");
    Ok(path)
}

#[derive(Serialize)]
struct ResultsFile<'a> {
    results: &'a [RegressionResult],
}

pub fn write_results_json(results: &[RegressionResult], out_dir: &Path) -> Result<PathBuf, PanelError> {
    let path = out_dir.join(RESULTS_JSON);
    let json = serde_json::to_string_pretty(&ResultsFile { results })?;
    fs::write(&path, json)?;
    info!(path = %path.display(), fits = results.len(), "wrote");
    Ok(path)
}
