/// Visualization module: static SVG charts for the regression output.
///
/// Two charts are produced:
/// - Event-study profile: point estimate per event time with a shaded 95%
///   band, the reference period pinned at zero, a dashed marker at the
///   treatment event and a horizontal zero line.
/// - Outcome trends: yearly mean of a pollutant for ever-treated and
///   never-treated cities.
///
/// Data is pulled out of the results / DataFrames into small intermediate
/// structs first; the SVG is then emitted as a self-contained string.
use std::collections::BTreeMap;

use polars::prelude::*;

use crate::error::PanelError;
use crate::regression::{EventPoint, RegressionResult};
use crate::schema::*;

// ── Config ──────────────────────────────────────────────────────────────────

/// Canvas geometry shared by both charts.
#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub width_px: u32,
    pub height_px: u32,
    pub margin_left: u32,
    pub margin_right: u32,
    pub margin_top: u32,
    pub margin_bottom: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width_px: 720,
            height_px: 420,
            margin_left: 72,
            margin_right: 24,
            margin_top: 44,
            margin_bottom: 52,
        }
    }
}

const BAND_FILL: &str = "#4dabf7";
const LINE_STROKE: &str = "#1c7ed6";
const TREATED_STROKE: &str = "#e8590c";
const CONTROL_STROKE: &str = "#495057";

// ── Intermediate data structures ────────────────────────────────────────────

/// Yearly outcome means by treatment group.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSeries {
    pub outcome: String,
    pub years: Vec<i32>,
    pub treated: Vec<Option<f64>>,
    pub control: Vec<Option<f64>>,
}

/// Linear map from data coordinates to pixels.
struct Frame {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

impl Frame {
    fn new(config: &ChartConfig, x: (f64, f64), y: (f64, f64)) -> Self {
        let (mut y_min, mut y_max) = y;
        if (y_max - y_min).abs() < f64::EPSILON {
            y_min -= 1.0;
            y_max += 1.0;
        }
        let pad = 0.08 * (y_max - y_min);
        Self {
            x_min: x.0,
            x_max: if x.1 > x.0 { x.1 } else { x.0 + 1.0 },
            y_min: y_min - pad,
            y_max: y_max + pad,
            left: config.margin_left as f64,
            right: (config.width_px - config.margin_right) as f64,
            top: config.margin_top as f64,
            bottom: (config.height_px - config.margin_bottom) as f64,
        }
    }

    fn px(&self, x: f64) -> f64 {
        self.left + (x - self.x_min) / (self.x_max - self.x_min) * (self.right - self.left)
    }

    fn py(&self, y: f64) -> f64 {
        self.bottom - (y - self.y_min) / (self.y_max - self.y_min) * (self.bottom - self.top)
    }
}

// ── Data extraction ─────────────────────────────────────────────────────────

/// Yearly means of `outcome` for ever-treated and never-treated cities.
pub fn extract_trends(df: &DataFrame, outcome: &str) -> Result<TrendSeries, PanelError> {
    let grouped = df
        .clone()
        .lazy()
        .filter(col(outcome).is_not_null())
        .group_by([col(ids::YEAR), col(derived::EVER_TREATED)])
        .agg([col(outcome).mean().alias("mean")])
        .collect()?;

    let years = grouped.column(ids::YEAR)?.i32()?;
    let ever = grouped.column(derived::EVER_TREATED)?.i32()?;
    let means = grouped.column("mean")?.f64()?;

    let mut by_year: BTreeMap<i32, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for i in 0..grouped.height() {
        let (Some(year), Some(group)) = (years.get(i), ever.get(i)) else {
            continue;
        };
        let entry = by_year.entry(year).or_default();
        if group == 1 {
            entry.0 = means.get(i);
        } else {
            entry.1 = means.get(i);
        }
    }

    Ok(TrendSeries {
        outcome: outcome.to_string(),
        years: by_year.keys().copied().collect(),
        treated: by_year.values().map(|v| v.0).collect(),
        control: by_year.values().map(|v| v.1).collect(),
    })
}

// ── SVG generation ──────────────────────────────────────────────────────────

/// Event-time profile chart. Returns `None` when the result has no profile.
pub fn event_study_svg(result: &RegressionResult, config: &ChartConfig) -> Option<String> {
    let points: &[EventPoint] = &result.event_profile;
    if points.is_empty() {
        return None;
    }

    let x_min = points.iter().map(|p| p.offset).min().unwrap_or(event::MIN_OFFSET) as f64;
    let x_max = points.iter().map(|p| p.offset).max().unwrap_or(event::MAX_OFFSET) as f64;
    let finite = |v: f64| v.is_finite().then_some(v);
    let lows = points.iter().filter_map(|p| finite(p.ci_low));
    let highs = points.iter().filter_map(|p| finite(p.ci_high));
    let y_min = lows.fold(0.0_f64, f64::min);
    let y_max = highs.fold(0.0_f64, f64::max);
    let frame = Frame::new(config, (x_min - 0.5, x_max + 0.5), (y_min, y_max));

    let mut svg = open_svg(config);
    svg.push_str(&title(
        config,
        &format!("{}: {} by event time", result.outcome, result.specification),
    ));
    svg.push_str(&axes(&frame, &integer_ticks(x_min as i32, x_max as i32), "Years relative to NRCP"));

    // 95% band, upper edge left to right then lower edge back.
    let band: Vec<String> = points
        .iter()
        .filter(|p| p.ci_high.is_finite())
        .map(|p| format!("{:.2},{:.2}", frame.px(p.offset as f64), frame.py(p.ci_high)))
        .chain(
            points
                .iter()
                .rev()
                .filter(|p| p.ci_low.is_finite())
                .map(|p| format!("{:.2},{:.2}", frame.px(p.offset as f64), frame.py(p.ci_low))),
        )
        .collect();
    svg.push_str(&format!(
        r##"<polygon class="band" points="{}" fill="{BAND_FILL}" fill-opacity="0.25" stroke="none"/>
"##,
        band.join(" ")
    ));

    svg.push_str(&hline(&frame, 0.0, "#868e96", None));
    svg.push_str(&vline(&frame, 0.0, "#868e96", Some("5,4")));

    let line: Vec<String> = points
        .iter()
        .map(|p| format!("{:.2},{:.2}", frame.px(p.offset as f64), frame.py(p.estimate)))
        .collect();
    svg.push_str(&format!(
        r##"<polyline points="{}" fill="none" stroke="{LINE_STROKE}" stroke-width="2"/>
"##,
        line.join(" ")
    ));

    for p in points {
        let fill = if p.reference { "#fff" } else { LINE_STROKE };
        svg.push_str(&format!(
            r##"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{fill}" stroke="{LINE_STROKE}" stroke-width="1.5"><title>t={}: {:.4} [{:.4}, {:.4}]</title></circle>
"##,
            frame.px(p.offset as f64),
            frame.py(p.estimate),
            p.offset,
            p.estimate,
            p.ci_low,
            p.ci_high,
        ));
    }

    svg.push_str("</svg>\n");
    Some(svg)
}

/// Outcome trends chart for ever-treated vs never-treated cities.
pub fn trends_svg(series: &TrendSeries, config: &ChartConfig) -> String {
    let mut svg = open_svg(config);
    svg.push_str(&title(config, &format!("{}: yearly mean by NRCP status", series.outcome)));

    let values = series.treated.iter().chain(&series.control).flatten();
    let (y_min, y_max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(*v), hi.max(*v))
    });
    let (Some(&first), Some(&last)) = (series.years.first(), series.years.last()) else {
        svg.push_str("</svg>\n");
        return svg;
    };
    let (y_min, y_max) = if y_min.is_finite() { (y_min, y_max) } else { (0.0, 1.0) };
    let frame = Frame::new(config, (first as f64 - 0.5, last as f64 + 0.5), (y_min, y_max));

    svg.push_str(&axes(&frame, &integer_ticks(first, last), "Year"));
    svg.push_str(&vline(&frame, derived::POST_YEAR as f64 - 0.5, "#868e96", Some("5,4")));

    for (label, values, stroke, row) in [
        ("Ever treated", &series.treated, TREATED_STROKE, 0),
        ("Never treated", &series.control, CONTROL_STROKE, 1),
    ] {
        let points: Vec<String> = series
            .years
            .iter()
            .zip(values)
            .filter_map(|(y, v)| v.map(|v| format!("{:.2},{:.2}", frame.px(*y as f64), frame.py(v))))
            .collect();
        svg.push_str(&format!(
            r##"<polyline points="{}" fill="none" stroke="{stroke}" stroke-width="2"/>
"##,
            points.join(" ")
        ));
        let ly = frame.top + 14.0 + 16.0 * row as f64;
        svg.push_str(&format!(
            r##"<line x1="{x1:.2}" y1="{ly:.2}" x2="{x2:.2}" y2="{ly:.2}" stroke="{stroke}" stroke-width="2"/><text class="legend" x="{tx:.2}" y="{ty:.2}">{label}</text>
"##,
            x1 = frame.right - 140.0,
            x2 = frame.right - 118.0,
            tx = frame.right - 112.0,
            ty = ly + 4.0,
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

// ── SVG helpers ─────────────────────────────────────────────────────────────

fn open_svg(config: &ChartConfig) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
<style>
  .title {{ font-family: sans-serif; font-size: 14px; font-weight: 600; fill: #212529; text-anchor: middle; }}
  .tick {{ font-family: sans-serif; font-size: 11px; fill: #495057; }}
  .axis-label {{ font-family: sans-serif; font-size: 12px; fill: #495057; text-anchor: middle; }}
  .legend {{ font-family: sans-serif; font-size: 11px; fill: #212529; }}
</style>
<rect width="{w}" height="{h}" fill="#fff"/>
"##,
        w = config.width_px,
        h = config.height_px,
    )
}

fn title(config: &ChartConfig, text: &str) -> String {
    format!(
        r##"<text class="title" x="{:.1}" y="24">{}</text>
"##,
        config.width_px as f64 / 2.0,
        escape_xml(text)
    )
}

fn axes(frame: &Frame, x_ticks: &[i32], x_label: &str) -> String {
    let mut s = format!(
        r##"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="none" stroke="#ced4da"/>
"##,
        frame.left,
        frame.top,
        frame.right - frame.left,
        frame.bottom - frame.top
    );
    for &t in x_ticks {
        let x = frame.px(t as f64);
        s.push_str(&format!(
            r##"<text class="tick" x="{x:.2}" y="{:.2}" text-anchor="middle">{t}</text>
"##,
            frame.bottom + 16.0
        ));
    }
    for v in nice_ticks(frame.y_min, frame.y_max, 5) {
        s.push_str(&format!(
            r##"<text class="tick" x="{:.2}" y="{:.2}" text-anchor="end">{}</text>
"##,
            frame.left - 6.0,
            frame.py(v) + 4.0,
            format_tick(v)
        ));
    }
    s.push_str(&format!(
        r##"<text class="axis-label" x="{:.2}" y="{:.2}">{}</text>
"##,
        (frame.left + frame.right) / 2.0,
        frame.bottom + 38.0,
        escape_xml(x_label)
    ));
    s
}

fn hline(frame: &Frame, y: f64, stroke: &str, dash: Option<&str>) -> String {
    format!(
        r##"<line x1="{:.2}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}" stroke="{stroke}" stroke-width="1"{}/>
"##,
        frame.left,
        frame.right,
        dash_attr(dash),
        y = frame.py(y),
    )
}

fn vline(frame: &Frame, x: f64, stroke: &str, dash: Option<&str>) -> String {
    format!(
        r##"<line x1="{x:.2}" y1="{:.2}" x2="{x:.2}" y2="{:.2}" stroke="{stroke}" stroke-width="1"{}/>
"##,
        frame.top,
        frame.bottom,
        dash_attr(dash),
        x = frame.px(x),
    )
}

fn dash_attr(dash: Option<&str>) -> String {
    dash.map(|d| format!(r#" stroke-dasharray="{d}""#))
        .unwrap_or_default()
}

fn integer_ticks(min: i32, max: i32) -> Vec<i32> {
    let span = (max - min).max(1);
    let step = (span / 10).max(1);
    (min..=max).step_by(step as usize).collect()
}

/// Round tick values (steps of 1, 2 or 5 × 10ᵏ) inside `[lo, hi]`.
fn nice_ticks(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo || count == 0 {
        return Vec::new();
    }
    let raw = (hi - lo) / count as f64;
    let mag = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 5.0, 10.0]
        .into_iter()
        .map(|m| m * mag)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * mag);
    let mut ticks = Vec::new();
    let mut v = (lo / step).ceil() * step;
    while v <= hi + step * 1e-9 {
        ticks.push(if v.abs() < step * 1e-9 { 0.0 } else { v });
        v += step;
    }
    ticks
}

fn format_tick(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e6 {
        format!("{}", v as i64)
    } else if v.abs() >= 0.01 {
        format!("{v:.2}")
    } else {
        format!("{v:.1e}")
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
