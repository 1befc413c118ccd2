//! SVG charts for the realized cap and MVRV series.
//!
//! Dates are plotted as day numbers on an `f64` axis and formatted back to
//! `YYYY-MM-DD` for the tick labels.

use chrono::{Datelike, NaiveDate};
use eyre::{eyre, Result};
use mvrv_data::types::{DailyRealizedCap, MvrvRecord};
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

const CHART_SIZE: (u32, u32) = (1200, 500);

struct SeriesStyle<'a> {
    title: &'a str,
    y_desc: &'a str,
    label: &'a str,
    /// Horizontal reference line and its legend label.
    threshold: Option<(f64, &'a str)>,
    y_formatter: fn(&f64) -> String,
}

/// Renders the MVRV ratio with the `MVRV = 1` threshold.
///
/// # Errors
/// Returns error for an empty series or if the file cannot be written.
pub fn render_mvrv_chart(records: &[MvrvRecord], path: &Path) -> Result<()> {
    let points: Vec<(NaiveDate, f64)> = records.iter().map(|r| (r.date, r.mvrv_ratio)).collect();
    render_series(
        &points,
        path,
        &SeriesStyle {
            title: "MVRV Ratio Over Time",
            y_desc: "MVRV Ratio",
            label: "MVRV Ratio",
            threshold: Some((1.0, "MVRV = 1 threshold")),
            y_formatter: |v| format!("{v:.2}"),
        },
    )
}

/// Renders the daily realized cap trend.
///
/// # Errors
/// Returns error for an empty series or if the file cannot be written.
pub fn render_realized_cap_chart(days: &[DailyRealizedCap], path: &Path) -> Result<()> {
    let points: Vec<(NaiveDate, f64)> = days.iter().map(|d| (d.date, d.realized_cap)).collect();
    render_series(
        &points,
        path,
        &SeriesStyle {
            title: "Realized Cap Trend",
            y_desc: "Realized Cap ($)",
            label: "Realized Cap (USD)",
            threshold: None,
            y_formatter: |v| format_usd_compact(*v),
        },
    )
}

fn render_series(points: &[(NaiveDate, f64)], path: &Path, style: &SeriesStyle<'_>) -> Result<()> {
    if points.is_empty() {
        return Err(eyre!("nothing to plot for '{}'", style.title));
    }

    let mut sorted: Vec<(f64, f64)> = points
        .iter()
        .map(|(date, value)| (day_number(*date), *value))
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let x_range = padded_range(sorted.iter().map(|p| p.0), 0.02, 1.0);
    let threshold = style.threshold.map(|(value, _)| value);
    let y_range = padded_range(sorted.iter().map(|p| p.1).chain(threshold), 0.1, 1.0);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(style.title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(70)
        .y_label_area_size(90)
        .build_cartesian_2d(x_range.clone(), y_range)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc(style.y_desc)
        .x_labels(10)
        .x_label_formatter(&|x| format_day_number(*x))
        .y_label_formatter(&style.y_formatter)
        .draw()
        .map_err(draw_err)?;

    chart
        .draw_series(LineSeries::new(sorted.iter().copied(), &BLUE))
        .map_err(draw_err)?
        .label(style.label)
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(sorted.iter().map(|p| Circle::new(*p, 3, BLUE.filled())))
        .map_err(draw_err)?;

    if let Some((value, label)) = style.threshold {
        chart
            .draw_series(LineSeries::new(
                vec![(x_range.start, value), (x_range.end, value)],
                RED.stroke_width(2),
            ))
            .map_err(draw_err)?
            .label(label)
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(draw_err)?;

    root.present().map_err(draw_err)?;
    tracing::info!(path = %path.display(), points = sorted.len(), "chart written");
    Ok(())
}

fn draw_err<E: std::fmt::Display>(e: E) -> eyre::Report {
    eyre!("failed to draw chart: {e}")
}

fn day_number(date: NaiveDate) -> f64 {
    f64::from(date.num_days_from_ce())
}

fn format_day_number(x: f64) -> String {
    NaiveDate::from_num_days_from_ce_opt(x.round() as i32)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Min/max of `values` widened by `pad_ratio` of the span. When all values
/// coincide the pad is `pad_ratio` of the value, but at least `min_pad`.
fn padded_range(values: impl Iterator<Item = f64>, pad_ratio: f64, min_pad: f64) -> Range<f64> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = hi - lo;
    let pad = if span > 0.0 {
        span * pad_ratio
    } else {
        min_pad.max(hi.abs() * pad_ratio)
    };
    (lo - pad)..(hi + pad)
}

/// `$1.23B`-style label for large USD amounts.
pub fn format_usd_compact(value: f64) -> String {
    let abs = value.abs();
    let (scaled, suffix) = if abs >= 1e12 {
        (value / 1e12, "T")
    } else if abs >= 1e9 {
        (value / 1e9, "B")
    } else if abs >= 1e6 {
        (value / 1e6, "M")
    } else if abs >= 1e3 {
        (value / 1e3, "K")
    } else {
        (value, "")
    };
    format!("${scaled:.2}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_usd_compact_picks_suffix() {
        assert_eq!(format_usd_compact(950.0), "$950.00");
        assert_eq!(format_usd_compact(1_250_000.0), "$1.25M");
        assert_eq!(format_usd_compact(3_400_000_000.0), "$3.40B");
        assert_eq!(format_usd_compact(1.5e12), "$1.50T");
    }

    #[test]
    fn day_numbers_roundtrip_to_dates() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        assert_eq!(format_day_number(day_number(date)), "2025-05-01");
    }

    #[test]
    fn padded_range_handles_single_value() {
        let range = padded_range([2.0].into_iter(), 0.1, 1.0);
        assert_eq!(range, 1.0..3.0);

        let range = padded_range([2.5e9].into_iter(), 0.1, 1.0);
        assert!((range.start - 2.25e9).abs() < 1.0);
        assert!((range.end - 2.75e9).abs() < 1.0);

        let range = padded_range([0.0, 10.0].into_iter(), 0.1, 1.0);
        assert_eq!(range, -1.0..11.0);
    }

    #[test]
    fn empty_series_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        assert!(render_mvrv_chart(&[], &dir.path().join("mvrv.svg")).is_err());
    }

    #[test]
    fn mvrv_chart_writes_svg() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("mvrv.svg");
        let records: Vec<MvrvRecord> = (1..=5)
            .map(|d| MvrvRecord {
                date: NaiveDate::from_ymd_opt(2025, 5, d).unwrap(),
                realized_cap_usd: 1_000.0,
                btc_price_usd: 95_000.0,
                market_cap_usd: 1_000.0 * (0.8 + 0.1 * f64::from(d)),
                mvrv_ratio: 0.8 + 0.1 * f64::from(d),
            })
            .collect();

        render_mvrv_chart(&records, &path).expect("chart should render");
        let svg = std::fs::read_to_string(&path).expect("svg should exist");
        assert!(svg.contains("<svg"));
        assert!(svg.contains("MVRV Ratio Over Time"));
    }

    #[test]
    fn realized_cap_chart_writes_single_point() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("realized.svg");
        let days = vec![DailyRealizedCap {
            date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            realized_cap: 2.5e9,
        }];

        render_realized_cap_chart(&days, &path).expect("chart should render");
        assert!(path.exists());
    }
}
