//! Polar plots of the regional scores of a subject, normalised by the cohort statistics.
//!
//! Each measure gets a radar chart, with one axis per region. A score `x` is drawn at
//! `(x - m) / s + 3`, i.e. on a scale from -3 to +3 standard deviations around the cohort
//! mean. Scores further than 2 standard deviations away are marked as outliers.

use tracing::debug;

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{FsError, Result};
use crate::stattools::RegionStats;

const SIGMA_THR: f64 = 2.0;
const NB_COLS: usize = 4;
const CELL: f64 = 520.0;
const RADIUS: f64 = 180.0;
const TITLE_HEIGHT: f64 = 60.0;
const COLOR_OK: &str = "#3b4cc0";
const COLOR_OUT: &str = "#b40426";
const TICK_LABELS: [&str; 7] = ["-3σ", "-2σ", "-σ", "μ", "+σ", "+2σ", "+3σ"];


/// Measure to region to scores.
pub type MeasureStats = BTreeMap<String, BTreeMap<String, RegionStats>>;


/// Score of a subject on the -3σ..+3σ scale centered on 3, floored at 0. A cohort with no
/// variance maps every score to 0.
pub fn normalized_score(individual_mean: f64, cohort: &RegionStats) -> f64 {
    if cohort.s == 0.0 {
        return 0.0;
    }
    ((individual_mean - cohort.m) / cohort.s + 3.0).max(0.0)
}

/// Whether a normalized score is further than 2 standard deviations from the mean.
pub fn is_outlier(score: f64) -> bool {
    score > 3.0 + SIGMA_THR || score < 3.0 - SIGMA_THR
}


/// Save the polar plots of `individual_stats` against `cohort_stats` as an SVG file.
///
/// Both come from [`population_summary`](crate::stattools::population_summary), for one
/// hemisphere or `aseg`. Every region of the subject must be in the cohort.
pub fn polar_plot<P: AsRef<Path>>(
    individual_stats: &MeasureStats,
    cohort_stats: &MeasureStats,
    snapfile: P,
    name: Option<&str>,
) -> Result<()> {
    let mut file = BufWriter::new(File::create(snapfile.as_ref())?);
    write_polar_plot(&mut file, individual_stats, cohort_stats, name)?;
    file.flush()?;
    debug!("Polar plot saved: {}", snapfile.as_ref().display());
    Ok(())
}


/// Write the polar plots as SVG to `output`.
pub fn write_polar_plot<W: Write>(
    output: &mut W,
    individual_stats: &MeasureStats,
    cohort_stats: &MeasureStats,
    name: Option<&str>,
) -> Result<()> {
    let nb_plots = individual_stats.len();
    let nb_rows = (nb_plots + NB_COLS - 1) / NB_COLS;
    let width = CELL * NB_COLS as f64;
    let height = TITLE_HEIGHT + CELL * nb_rows as f64;

    writeln!(output, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        output,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
        w = width, h = height
    )?;
    writeln!(output, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        output,
        r#"<text x="{}" y="36" text-anchor="middle" font-size="24" font-weight="bold">{}</text>"#,
        width / 2.0, escape(name.unwrap_or(""))
    )?;

    for (idx, (measure_name, regions)) in individual_stats.iter().enumerate() {
        let cohort = cohort_stats.get(measure_name).ok_or_else(|| {
            FsError::InvalidArgument(format!("No cohort statistics for measure '{}'.", measure_name))
        })?;
        let cx = CELL * (idx % NB_COLS) as f64 + CELL / 2.0;
        let cy = TITLE_HEIGHT + CELL * (idx / NB_COLS) as f64 + CELL / 2.0;
        write_measure(output, measure_name, regions, cohort, cx, cy)?;
    }
    writeln!(output, "</svg>")?;
    Ok(())
}


fn write_measure<W: Write>(
    output: &mut W,
    measure_name: &str,
    regions: &BTreeMap<String, RegionStats>,
    cohort: &BTreeMap<String, RegionStats>,
    cx: f64,
    cy: f64,
) -> Result<()> {
    let nb_regions = regions.len().max(1);
    // First axis at the top.
    let angles: Vec<f64> = (0..nb_regions).map(|i| PI / 2.0 + 2.0 * PI * i as f64 / nb_regions as f64).collect();
    let point = |angle: f64, score: f64| {
        let r = RADIUS * score / 6.0;
        (cx + r * angle.cos(), cy - r * angle.sin())
    };

    writeln!(output, "<g>")?;
    writeln!(
        output,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="16" font-weight="bold">{}</text>"#,
        cx, cy - RADIUS - 40.0, escape(measure_name)
    )?;

    for (tick, label) in TICK_LABELS.iter().enumerate().skip(1) {
        let style = match tick {
            3 => r#"stroke="green" stroke-dasharray="6,4" stroke-width="2""#,
            t if t == 3 - SIGMA_THR as usize || t == 3 + SIGMA_THR as usize => r#"stroke="red""#,
            _ => r##"stroke="#cccccc""##,
        };
        writeln!(
            output,
            r#"<circle cx="{}" cy="{}" r="{:.2}" fill="none" {}/>"#,
            cx, cy, RADIUS * tick as f64 / 6.0, style
        )?;
        writeln!(
            output,
            r##"<text x="{}" y="{:.2}" font-size="10" fill="#555555">{}</text>"##,
            cx + 2.0, cy - RADIUS * tick as f64 / 6.0, label
        )?;
    }

    let mut polygon = Vec::with_capacity(regions.len());
    let mut markers = Vec::with_capacity(regions.len());
    for ((region_name, indstats), angle) in regions.iter().zip(angles.iter()) {
        let stats = cohort.get(region_name).ok_or_else(|| {
            FsError::InvalidArgument(format!(
                "No cohort statistics for region '{}' of measure '{}'.", region_name, measure_name))
        })?;
        let score = normalized_score(indstats.m, stats);
        let (x, y) = point(*angle, score);
        polygon.push(format!("{:.2},{:.2}", x, y));
        markers.push((x, y, is_outlier(score)));

        let (ax, ay) = point(*angle, 6.0);
        let (lx, ly) = point(*angle, 6.6);
        writeln!(output, r##"<line x1="{}" y1="{}" x2="{:.2}" y2="{:.2}" stroke="#dddddd"/>"##, cx, cy, ax, ay)?;
        writeln!(
            output,
            r#"<text x="{:.2}" y="{:.2}" text-anchor="middle" font-size="10">{}</text>"#,
            lx, ly, escape(region_name)
        )?;
    }

    writeln!(
        output,
        r#"<polygon points="{}" fill="blue" fill-opacity="0.25" stroke="blue"/>"#,
        polygon.join(" ")
    )?;
    for (x, y, outlier) in markers {
        let (color, class) = if outlier { (COLOR_OUT, "outlier") } else { (COLOR_OK, "ok") };
        writeln!(output, r#"<circle class="{}" cx="{:.2}" cy="{:.2}" r="5" fill="{}"/>"#, class, x, y, color)?;
    }
    writeln!(output, "</g>")?;
    Ok(())
}


fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
